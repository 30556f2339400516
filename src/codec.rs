//! Line-level reading and writing of time-series files.

use chrono::NaiveDateTime;
use log::debug;
use std::io::{self, BufRead};

use crate::errors::{Result, RowError, UpdateError};
use crate::models::quote::{FileVariant, RawRow, Row};
use crate::util;

pub const SINGLE_HEADER: &str = "datetime,open,high,low,close,volume";
pub const MULTI_HEADER: &str = "symbol,datetime,open,high,low,close,volume";

const SINGLE_HEADER_PREFIX: &str = "datetime,";
const MULTI_HEADER_PREFIX: &str = "symbol,datetime,";

/// The parts of a data line the update engine needs; the line itself is
/// copied through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedRow<'a> {
    /// Always `Some` for multi-symbol files.
    pub symbol: Option<&'a str>,
    pub timestamp: NaiveDateTime,
}

/// Lines of `reader`, split on `\n`. A line that is not valid UTF-8 comes
/// back as `None` so callers can skip it like any other malformed row.
pub fn text_lines<R: BufRead>(reader: R) -> impl Iterator<Item = io::Result<Option<String>>> {
    reader
        .split(b'\n')
        .map(|line| line.map(|bytes| String::from_utf8(bytes).ok()))
}

/// Strip surrounding whitespace and a trailing CR from a header line.
pub fn normalize_header(header: &str) -> &str {
    header.trim().trim_end_matches('\r')
}

pub fn detect_variant(header: &str) -> Result<FileVariant> {
    let lower = normalize_header(header).to_ascii_lowercase();
    if lower.starts_with(MULTI_HEADER_PREFIX) {
        Ok(FileVariant::Multi)
    } else if lower.starts_with(SINGLE_HEADER_PREFIX) {
        Ok(FileVariant::Single)
    } else {
        Err(UpdateError::UnrecognizedFormat(
            normalize_header(header).to_string(),
        ))
    }
}

pub fn parse_row(line: &str, variant: FileVariant) -> std::result::Result<ParsedRow<'_>, RowError> {
    let cols: Vec<&str> = line.split(',').collect();
    if cols.len() < variant.min_columns() {
        return Err(RowError::TooFewColumns {
            expected: variant.min_columns(),
            found: cols.len(),
        });
    }

    let raw_ts = cols[variant.datetime_column()].trim();
    let timestamp =
        util::parse_datetime(raw_ts).map_err(|_| RowError::BadTimestamp(raw_ts.to_string()))?;

    let symbol = match variant {
        FileVariant::Single => None,
        FileVariant::Multi => Some(cols[0].trim()),
    };

    Ok(ParsedRow { symbol, timestamp })
}

/// Crypto and FX pairs need more than cents.
pub fn precision_for(symbol: &str) -> usize {
    let upper = symbol.to_ascii_uppercase();
    if upper.contains("BTC") || upper.contains("ETH") || upper.contains("USD") {
        8
    } else {
        2
    }
}

pub fn format_row(row: &Row, symbol_column: Option<&str>, precision: usize) -> String {
    let body = format!(
        "{},{:.p$},{:.p$},{:.p$},{:.p$},{:.p$}",
        util::format_datetime(&row.timestamp),
        row.open,
        row.high,
        row.low,
        row.close,
        row.volume,
        p = precision,
    );
    match symbol_column {
        Some(symbol) => format!("{},{}", symbol, body),
        None => body,
    }
}

/// Format a provider response as data lines for `symbol`, in fetched order.
///
/// Records with an unreadable date, or outside `[from, to]`, are dropped so a
/// provider that ignores the requested window cannot duplicate rows that are
/// kept from the original file.
pub fn format_fetched_rows(
    symbol: &str,
    raws: &[RawRow],
    variant: FileVariant,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Vec<String> {
    let precision = precision_for(symbol);
    let symbol_column = match variant {
        FileVariant::Single => None,
        FileVariant::Multi => Some(symbol),
    };

    let mut lines = Vec::with_capacity(raws.len());
    for raw in raws {
        let Some(row) = raw.to_row() else {
            debug!("{}: skipping record with unreadable date '{}'", symbol, raw.date);
            continue;
        };
        if row.timestamp < from || row.timestamp > to {
            debug!(
                "{}: skipping record {} outside requested window",
                symbol,
                util::format_datetime(&row.timestamp)
            );
            continue;
        }
        lines.push(format_row(&row, symbol_column, precision));
    }
    lines
}
