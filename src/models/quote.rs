use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

/// On-disk layout of a time-series file, decided by its header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileVariant {
    /// `datetime,open,high,low,close,volume`; symbol comes from the file name
    Single,
    /// `symbol,datetime,open,high,low,close,volume`
    Multi,
}

impl FileVariant {
    /// Minimum number of columns a data line needs to be considered a row.
    pub fn min_columns(self) -> usize {
        match self {
            FileVariant::Single => 6,
            FileVariant::Multi => 7,
        }
    }

    /// Index of the datetime column.
    pub fn datetime_column(self) -> usize {
        match self {
            FileVariant::Single => 0,
            FileVariant::Multi => 1,
        }
    }
}

/// 一行K线数据
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Daily record as returned by the quote provider.
///
/// Field names follow the Tiingo daily prices payload. Providers that do not
/// report corporate actions can leave `split_factor` and `div_cash` at their
/// neutral defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRow {
    pub date: String,
    #[serde(default)]
    pub open: f64,
    #[serde(default)]
    pub high: f64,
    #[serde(default)]
    pub low: f64,
    #[serde(default)]
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub adj_open: f64,
    #[serde(default)]
    pub adj_high: f64,
    #[serde(default)]
    pub adj_low: f64,
    #[serde(default)]
    pub adj_close: f64,
    #[serde(default)]
    pub adj_volume: f64,
    #[serde(default = "neutral_split_factor")]
    pub split_factor: f64,
    #[serde(default)]
    pub div_cash: f64,
}

fn neutral_split_factor() -> f64 {
    1.0
}

impl RawRow {
    /// Convenience constructor for an adjusted bar without corporate actions.
    pub fn adjusted(date: &str, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date: date.to_string(),
            open,
            high,
            low,
            close,
            volume,
            adj_open: open,
            adj_high: high,
            adj_low: low,
            adj_close: close,
            adj_volume: volume,
            split_factor: 1.0,
            div_cash: 0.0,
        }
    }

    /// Trading day of the record at midnight. Only the leading `YYYY-MM-DD`
    /// is read, so full ISO timestamps are accepted.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        let day = self.date.get(0..10)?;
        NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    /// Adjusted prices with the unadjusted volume, which is what gets stored.
    pub fn to_row(&self) -> Option<Row> {
        Some(Row {
            timestamp: self.timestamp()?,
            open: self.adj_open,
            high: self.adj_high,
            low: self.adj_low,
            close: self.adj_close,
            volume: self.volume,
        })
    }
}
