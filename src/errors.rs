use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Date parsing error: {0}")]
    DateError(#[from] chrono::ParseError),

    #[error("empty file: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("unrecognized CSV header: {0}")]
    UnrecognizedFormat(String),

    #[error("cannot infer symbol from filename: {}", .0.display())]
    CannotInferSymbol(PathBuf),

    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("update fetch errors ({count}): {}", .details.join("; "))]
    FetchErrors { count: usize, details: Vec<String> },

    #[error("write error: {0}")]
    WriteError(std::io::Error),

    #[error("worker task error: {0}")]
    TaskError(String),
}

impl UpdateError {
    /// "Not found" is the only per-symbol error that does not fail a batch.
    pub fn is_not_found(&self) -> bool {
        matches!(self, UpdateError::SymbolNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;

/// A single data line that could not be read; always skipped by the scanners.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("expected at least {expected} columns, found {found}")]
    TooFewColumns { expected: usize, found: usize },

    #[error("invalid timestamp: {0}")]
    BadTimestamp(String),
}
