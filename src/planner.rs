//! First pass over an existing file: variant, per-symbol date ranges and cutoffs.

use chrono::{Duration, NaiveDateTime};
use log::{info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::errors::{Result, UpdateError};
use crate::models::quote::FileVariant;

/// Earliest and last timestamp seen for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRange {
    pub earliest: NaiveDateTime,
    pub last: NaiveDateTime,
}

impl SymbolRange {
    fn new(ts: NaiveDateTime) -> Self {
        Self { earliest: ts, last: ts }
    }

    fn observe(&mut self, ts: NaiveDateTime) {
        if ts < self.earliest {
            self.earliest = ts;
        }
        if ts > self.last {
            self.last = ts;
        }
    }

    /// `last - backfill_days`, never earlier than `earliest`.
    pub fn cutoff(&self, backfill_days: u32) -> NaiveDateTime {
        self.last
            .checked_sub_signed(Duration::days(i64::from(backfill_days)))
            .map_or(self.earliest, |cutoff| cutoff.max(self.earliest))
    }
}

/// Everything the fetch and rewrite phases need to know about a file.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub path: PathBuf,
    /// Normalized header, written back verbatim.
    pub header: String,
    pub variant: FileVariant,
    /// Symbols in order of first appearance.
    symbols: Vec<String>,
    ranges: HashMap<String, SymbolRange>,
    /// Symbols whose rows reappear after another symbol's run, first seen first.
    interleaved: Vec<String>,
}

impl UpdatePlan {
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn range(&self, symbol: &str) -> Option<&SymbolRange> {
        self.ranges.get(symbol)
    }

    /// False when some symbol's rows are split into more than one run.
    pub fn is_contiguous(&self) -> bool {
        self.interleaved.is_empty()
    }

    pub fn interleaved(&self) -> &[String] {
        &self.interleaved
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn observe(&mut self, symbol: &str, ts: NaiveDateTime) {
        match self.ranges.get_mut(symbol) {
            Some(range) => range.observe(ts),
            None => {
                self.symbols.push(symbol.to_string());
                self.ranges.insert(symbol.to_string(), SymbolRange::new(ts));
            }
        }
    }
}

/// Symbol of a single-symbol file: the file name without its extension.
pub fn infer_symbol(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| UpdateError::CannotInferSymbol(path.to_path_buf()))
}

/// Scan `path` once and build its update plan.
pub fn plan_file(path: &Path) -> Result<UpdatePlan> {
    let mut lines = codec::text_lines(BufReader::new(File::open(path)?));
    let header = match lines.next() {
        Some(line) => codec::normalize_header(&line?.unwrap_or_default()).to_string(),
        None => return Err(UpdateError::EmptyFile(path.to_path_buf())),
    };
    let variant = codec::detect_variant(&header)?;
    let single_symbol = match variant {
        FileVariant::Single => Some(infer_symbol(path)?),
        FileVariant::Multi => None,
    };

    let mut plan = UpdatePlan {
        path: path.to_path_buf(),
        header,
        variant,
        symbols: Vec::new(),
        ranges: HashMap::new(),
        interleaved: Vec::new(),
    };

    let mut prev: Option<String> = None;
    for line in lines {
        let Some(line) = line? else {
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(row) = codec::parse_row(line, variant) else {
            continue;
        };
        let symbol = match (&single_symbol, row.symbol) {
            (Some(s), _) => s.as_str(),
            (None, Some(s)) => s,
            (None, None) => continue,
        };

        if prev.as_deref() != Some(symbol) {
            if plan.ranges.contains_key(symbol)
                && !plan.interleaved.iter().any(|s| s == symbol)
            {
                plan.interleaved.push(symbol.to_string());
            }
            prev = Some(symbol.to_string());
        }
        plan.observe(symbol, row.timestamp);
    }

    match variant {
        FileVariant::Single if plan.is_empty() => {
            return Err(UpdateError::EmptyFile(path.to_path_buf()));
        }
        FileVariant::Multi if !plan.is_contiguous() => {
            warn!(
                "{}: input not grouped by symbol ({}); proceeding but order may be suboptimal",
                path.display(),
                plan.interleaved.join(", ")
            );
        }
        _ => {}
    }

    info!(
        "Planned {} ({:?}): {} symbol(s)",
        path.display(),
        variant,
        plan.symbols.len()
    );
    Ok(plan)
}
