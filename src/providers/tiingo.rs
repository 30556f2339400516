use crate::errors::{Result, UpdateError};
use crate::models::quote::RawRow;
use crate::providers::base::QuoteFetcher;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use log::debug;
use reqwest::{Client, StatusCode};
use std::time::Duration;

pub const TIINGO_BASE_URL: &str = "https://api.tiingo.com";

/// Tiingo end-of-day prices
pub struct TiingoFetcher {
    client: Client,
    base_url: String,
}

impl TiingoFetcher {
    pub fn new() -> Result<Self> {
        Self::with_base_url(TIINGO_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(UpdateError::RequestError)?;

        Ok(Self::with_client(client, base_url))
    }

    /// Use a preconfigured client (proxy, TLS, timeouts).
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Tiingo spells share classes with a dash (`BRK-B`).
    pub fn api_symbol(symbol: &str) -> String {
        symbol.trim().replace('/', "-")
    }

    pub fn prices_url(&self, symbol: &str) -> String {
        format!(
            "{}/tiingo/daily/{}/prices",
            self.base_url,
            Self::api_symbol(symbol)
        )
    }
}

#[async_trait]
impl QuoteFetcher for TiingoFetcher {
    fn provider_name(&self) -> &'static str {
        "tiingo"
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
        token: &str,
    ) -> Result<Vec<RawRow>> {
        let start = from.format("%Y-%-m-%-d").to_string();
        let end = to.format("%Y-%-m-%-d").to_string();
        debug!("获取 {} 从 {} 到 {} 的日线数据", symbol, start, end);

        let response = self
            .client
            .get(self.prices_url(symbol))
            .query(&[("startDate", start.as_str()), ("endDate", end.as_str())])
            .header("Authorization", format!("Token {}", token))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let text = response.text().await?;
                let rows: Vec<RawRow> = serde_json::from_str(&text)?;
                debug!("{}: 获取到 {} 条记录", symbol, rows.len());
                Ok(rows)
            }
            StatusCode::NOT_FOUND => Err(UpdateError::SymbolNotFound(symbol.to_string())),
            status => Err(UpdateError::ProviderError(format!(
                "tiingo http status {}",
                status.as_u16()
            ))),
        }
    }
}
