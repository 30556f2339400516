use crate::errors::Result;
use crate::models::quote::RawRow;
use async_trait::async_trait;
use chrono::NaiveDateTime;

/// Source of daily quote history for one symbol
#[async_trait]
pub trait QuoteFetcher {
    /// Short provider name used in log lines
    fn provider_name(&self) -> &'static str;

    /// Fetch records for `symbol` over the closed interval `[from, to]`.
    /// An unknown symbol must be reported as `UpdateError::SymbolNotFound`
    async fn fetch_daily(
        &self,
        symbol: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
        token: &str,
    ) -> Result<Vec<RawRow>>;
}
