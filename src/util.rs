use chrono::{Local, NaiveDateTime};
use crate::errors::Result;

/// Timestamp layout used by every data line.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M";

const DATETIME_TEMPLATE: &str = "0000-01-01 00:00";

// 日期转换工具
pub fn parse_datetime(s: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
}

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// Parse a possibly partial date such as `2025`, `2025-03`, `2025-03-14` or
/// `2025-03-14 09:30`. Missing parts are filled from `0000-01-01 00:00`.
/// An empty string means "now".
pub fn parse_date_string(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(now());
    }
    let padded = match DATETIME_TEMPLATE.get(s.len()..) {
        Some(rest) => format!("{}{}", s, rest),
        None => s.to_string(),
    };
    Ok(parse_datetime(&padded)?)
}

/// Current wall-clock time, used when no explicit end is configured.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
