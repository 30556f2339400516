//! Second pass: stream the original file into a sibling temporary file,
//! splice in fresh rows, and atomically rename it over the original.

use log::info;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::codec;
use crate::errors::{Result, UpdateError};
use crate::models::quote::FileVariant;
use crate::planner::UpdatePlan;
use crate::services::orchestrator::SymbolRefresh;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Original rows copied through unchanged.
    pub kept: usize,
    /// Fresh rows written.
    pub appended: usize,
}

struct MergeWriter<'a, W: Write> {
    out: W,
    refreshed: &'a HashMap<String, SymbolRefresh>,
    flushed: HashSet<String>,
    stats: RewriteStats,
}

impl<'a, W: Write> MergeWriter<'a, W> {
    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line).map_err(UpdateError::WriteError)
    }

    fn keep(&mut self, line: &str) -> Result<()> {
        self.write_line(line)?;
        self.stats.kept += 1;
        Ok(())
    }

    /// Write `symbol`'s fresh lines unless they were already written.
    fn flush(&mut self, symbol: &str) -> Result<()> {
        let refreshed = self.refreshed;
        let Some(refresh) = refreshed.get(symbol) else {
            return Ok(());
        };
        if !self.flushed.insert(symbol.to_string()) {
            return Ok(());
        }
        for line in &refresh.lines {
            self.write_line(line)?;
        }
        self.stats.appended += refresh.lines.len();
        Ok(())
    }

    /// Rows older than the symbol's cutoff survive; symbols without a
    /// refresh keep everything.
    fn is_kept(&self, symbol: &str, ts: chrono::NaiveDateTime) -> bool {
        self.refreshed
            .get(symbol)
            .map_or(true, |refresh| ts < refresh.cutoff)
    }
}

fn merge_single<W: Write>(
    rows: impl Iterator<Item = io::Result<Option<String>>>,
    symbol: &str,
    merge: &mut MergeWriter<'_, W>,
) -> Result<()> {
    for line in rows {
        let Some(line) = line? else {
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(row) = codec::parse_row(line, FileVariant::Single) else {
            continue;
        };
        if merge.is_kept(symbol, row.timestamp) {
            merge.keep(line)?;
        }
    }
    merge.flush(symbol)
}

fn merge_multi<W: Write>(
    rows: impl Iterator<Item = io::Result<Option<String>>>,
    merge: &mut MergeWriter<'_, W>,
) -> Result<()> {
    let mut current: Option<String> = None;

    for line in rows {
        let Some(line) = line? else {
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(row) = codec::parse_row(line, FileVariant::Multi) else {
            continue;
        };
        let symbol = row.symbol.unwrap_or_default();

        // group boundary: the previous run is over, its fresh rows go here
        if current.as_deref() != Some(symbol) {
            if let Some(prev) = current.take() {
                merge.flush(&prev)?;
            }
            current = Some(symbol.to_string());
        }

        if merge.is_kept(symbol, row.timestamp) {
            merge.keep(line)?;
        }
    }

    if let Some(last) = current {
        merge.flush(&last)?;
    }
    Ok(())
}

/// Stream the merged contents of `plan.path` into `out`.
fn merge_into<W: Write>(
    plan: &UpdatePlan,
    refreshed: &HashMap<String, SymbolRefresh>,
    out: W,
) -> Result<RewriteStats> {
    let mut rows = codec::text_lines(BufReader::new(File::open(&plan.path)?));
    // header comes from the plan
    rows.next().transpose()?;

    let mut merge = MergeWriter {
        out,
        refreshed,
        flushed: HashSet::new(),
        stats: RewriteStats::default(),
    };
    merge.write_line(&plan.header)?;

    match plan.variant {
        FileVariant::Single => {
            let symbol = plan
                .symbols()
                .first()
                .ok_or_else(|| UpdateError::EmptyFile(plan.path.clone()))?;
            merge_single(rows, symbol, &mut merge)?;
        }
        FileVariant::Multi => merge_multi(rows, &mut merge)?,
    }

    merge.out.flush().map_err(UpdateError::WriteError)?;
    Ok(merge.stats)
}

/// Rewrite `plan.path` so every refreshed symbol's rows from its cutoff on
/// are replaced by its fresh lines. Nothing is visible at `plan.path` until
/// the final rename; on any error the temporary file is removed.
pub fn rewrite_file(
    plan: &UpdatePlan,
    refreshed: &HashMap<String, SymbolRefresh>,
) -> Result<RewriteStats> {
    replace_with(plan, |file| merge_into(plan, refreshed, BufWriter::new(file)))
}

/// Fill a sibling temporary file with `fill` and rename it over `plan.path`.
fn replace_with<F>(plan: &UpdatePlan, fill: F) -> Result<RewriteStats>
where
    F: FnOnce(&mut File) -> Result<RewriteStats>,
{
    let dir = match plan.path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(UpdateError::WriteError)?;

    let stats = fill(tmp.as_file_mut())?;

    let permissions = fs::metadata(&plan.path)?.permissions();
    fs::set_permissions(tmp.path(), permissions).map_err(UpdateError::WriteError)?;
    tmp.as_file().sync_all().map_err(UpdateError::WriteError)?;
    tmp.persist(&plan.path)
        .map_err(|e| UpdateError::WriteError(e.error))?;

    info!(
        "Rewrote {}: kept {} row(s), wrote {} fresh row(s)",
        plan.path.display(),
        stats.kept,
        stats.appended
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan_file;
    use crate::util::parse_datetime;
    use tempfile::tempdir;

    /// Accepts `budget` bytes, then fails every write.
    struct FailingWriter<W> {
        inner: W,
        budget: usize,
    }

    impl<W: Write> Write for FailingWriter<W> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.budget {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.budget -= buf.len();
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    fn refresh(cutoff: &str, lines: &[&str]) -> SymbolRefresh {
        SymbolRefresh {
            cutoff: parse_datetime(cutoff).unwrap(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
            full_redownload: false,
        }
    }

    #[test]
    fn single_keeps_old_rows_and_appends_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spy.csv");
        fs::write(
            &path,
            "datetime,open,high,low,close,volume\n\
             2025-01-01 00:00,1,1,1,10,100\n\
             2025-01-02 00:00,1,1,1,11,100\n\
             2025-01-03 00:00,1,1,1,12,100\n",
        )
        .unwrap();
        let plan = plan_file(&path).unwrap();
        let refreshed = HashMap::from([(
            "spy".to_string(),
            refresh("2025-01-03 00:00", &["2025-01-03 00:00,2.00,2.00,2.00,42.00,1.00"]),
        )]);

        let stats = rewrite_file(&plan, &refreshed).unwrap();

        assert_eq!(stats, RewriteStats { kept: 2, appended: 1 });
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "datetime,open,high,low,close,volume\n\
             2025-01-01 00:00,1,1,1,10,100\n\
             2025-01-02 00:00,1,1,1,11,100\n\
             2025-01-03 00:00,2.00,2.00,2.00,42.00,1.00\n"
        );
    }

    #[test]
    fn multi_flushes_at_group_boundaries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("all.csv");
        fs::write(
            &path,
            "symbol,datetime,open,high,low,close,volume\n\
             bbb,2025-01-01 00:00,1,1,1,20,100\n\
             bbb,2025-01-02 00:00,1,1,1,21,100\n\
             aaa,2025-01-01 00:00,1,1,1,10,100\n\
             aaa,2025-01-02 00:00,1,1,1,11,100\n",
        )
        .unwrap();
        let plan = plan_file(&path).unwrap();
        let refreshed = HashMap::from([
            ("aaa".to_string(), refresh("2025-01-02 00:00", &["aaa,2025-01-02 00:00,new"])),
            ("bbb".to_string(), refresh("2025-01-02 00:00", &["bbb,2025-01-02 00:00,new"])),
        ]);

        rewrite_file(&plan, &refreshed).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "symbol,datetime,open,high,low,close,volume\n\
             bbb,2025-01-01 00:00,1,1,1,20,100\n\
             bbb,2025-01-02 00:00,new\n\
             aaa,2025-01-01 00:00,1,1,1,10,100\n\
             aaa,2025-01-02 00:00,new\n"
        );
    }

    #[test]
    fn symbol_without_refresh_is_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("all.csv");
        fs::write(
            &path,
            "symbol,datetime,open,high,low,close,volume\n\
             aaa,2025-01-01 00:00,1,1,1,10,100\n\
             aaa,2025-01-02 00:00,1,1,1,11,100\n\
             zzz,2025-01-01 00:00,1,1,1,90,100\n",
        )
        .unwrap();
        let plan = plan_file(&path).unwrap();
        let refreshed = HashMap::from([(
            "zzz".to_string(),
            refresh("2025-01-01 00:00", &["zzz,2025-01-01 00:00,new"]),
        )]);

        let stats = rewrite_file(&plan, &refreshed).unwrap();

        assert_eq!(stats, RewriteStats { kept: 2, appended: 1 });
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "symbol,datetime,open,high,low,close,volume\n\
             aaa,2025-01-01 00:00,1,1,1,10,100\n\
             aaa,2025-01-02 00:00,1,1,1,11,100\n\
             zzz,2025-01-01 00:00,new\n"
        );
    }

    #[test]
    fn interleaved_symbol_is_flushed_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("all.csv");
        fs::write(
            &path,
            "symbol,datetime,open,high,low,close,volume\n\
             aaa,2025-01-01 00:00,1,1,1,10,100\n\
             bbb,2025-01-01 00:00,1,1,1,20,100\n\
             aaa,2025-01-02 00:00,1,1,1,11,100\n",
        )
        .unwrap();
        let plan = plan_file(&path).unwrap();
        let refreshed = HashMap::from([(
            "aaa".to_string(),
            refresh("2025-01-02 00:00", &["aaa,2025-01-02 00:00,new"]),
        )]);

        rewrite_file(&plan, &refreshed).unwrap();

        let body = fs::read_to_string(&path).unwrap();
        assert_eq!(body.matches("aaa,2025-01-02 00:00,new").count(), 1);
        assert_eq!(
            body,
            "symbol,datetime,open,high,low,close,volume\n\
             aaa,2025-01-01 00:00,1,1,1,10,100\n\
             aaa,2025-01-02 00:00,new\n\
             bbb,2025-01-01 00:00,1,1,1,20,100\n"
        );
    }

    #[test]
    fn crlf_and_blank_lines_are_normalized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spy.csv");
        fs::write(
            &path,
            "datetime,open,high,low,close,volume\r\n\
             2025-01-01 00:00,1,1,1,10,100\r\n\
             \r\n\
             2025-01-02 00:00,1,1,1,11,100\r\n",
        )
        .unwrap();
        let plan = plan_file(&path).unwrap();

        rewrite_file(&plan, &HashMap::new()).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "datetime,open,high,low,close,volume\n\
             2025-01-01 00:00,1,1,1,10,100\n\
             2025-01-02 00:00,1,1,1,11,100\n"
        );
    }

    #[test]
    fn no_temporary_file_is_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spy.csv");
        fs::write(&path, "datetime,open,high,low,close,volume\n2025-01-01 00:00,1,1,1,10,100\n")
            .unwrap();
        let plan = plan_file(&path).unwrap();

        rewrite_file(&plan, &HashMap::new()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn rows_with_invalid_utf8_are_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spy.csv");
        let mut body = b"datetime,open,high,low,close,volume\n".to_vec();
        body.extend_from_slice(b"2025-01-01 00:00,1,1,1,10,100\n");
        body.extend_from_slice(b"\xff\xfe garbage\n");
        body.extend_from_slice(b"2025-01-02 00:00,1,1,1,11,100\n");
        fs::write(&path, body).unwrap();
        let plan = plan_file(&path).unwrap();

        let stats = rewrite_file(&plan, &HashMap::new()).unwrap();

        assert_eq!(stats, RewriteStats { kept: 2, appended: 0 });
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "datetime,open,high,low,close,volume\n\
             2025-01-01 00:00,1,1,1,10,100\n\
             2025-01-02 00:00,1,1,1,11,100\n"
        );
    }

    #[test]
    fn failed_write_keeps_the_original_and_removes_the_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spy.csv");
        let original = "datetime,open,high,low,close,volume\n\
                        2025-01-01 00:00,1,1,1,10,100\n\
                        2025-01-02 00:00,1,1,1,11,100\n";
        fs::write(&path, original).unwrap();
        let plan = plan_file(&path).unwrap();
        let refreshed = HashMap::from([(
            "spy".to_string(),
            refresh("2025-01-02 00:00", &["2025-01-02 00:00,2.00,2.00,2.00,42.00,1.00"]),
        )]);

        // room for the header only
        let result = replace_with(&plan, |file| {
            merge_into(&plan, &refreshed, FailingWriter { inner: file, budget: 40 })
        });

        assert!(matches!(result, Err(UpdateError::WriteError(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
