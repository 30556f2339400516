use chrono::NaiveDateTime;
use std::time::Duration;

pub const DEFAULT_BACKFILL_DAYS: u32 = 5;
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Be nice to the provider, don't get blocked.
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub token: String,
    pub backfill_days: u32,
    pub full_redownload: bool,
    pub concurrency: usize,
    /// Minimum spacing between outbound requests across all workers; `None` disables pacing.
    pub request_interval: Option<Duration>,
    /// Last moment to fetch up to; `None` means now.
    pub end: Option<NaiveDateTime>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateConfig {
    pub fn new() -> Self {
        Self {
            token: String::new(),
            backfill_days: DEFAULT_BACKFILL_DAYS,
            full_redownload: false,
            concurrency: DEFAULT_CONCURRENCY,
            request_interval: Some(DEFAULT_REQUEST_INTERVAL),
            end: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = token.to_string();
        self
    }

    /// Negative windows are treated as zero.
    pub fn with_backfill_days(mut self, days: i64) -> Self {
        self.backfill_days = days.clamp(0, i64::from(u32::MAX)) as u32;
        self
    }

    pub fn with_full_redownload(mut self, full_redownload: bool) -> Self {
        self.full_redownload = full_redownload;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// A zero interval turns pacing off.
    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = if interval.is_zero() { None } else { Some(interval) };
        self
    }

    pub fn with_end(mut self, end: NaiveDateTime) -> Self {
        self.end = Some(end);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_values_are_coerced() {
        let config = UpdateConfig::new()
            .with_backfill_days(-3)
            .with_concurrency(0)
            .with_request_interval(Duration::ZERO);
        assert_eq!(config.backfill_days, 0);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.request_interval, None);
        assert_eq!(UpdateConfig::new().with_backfill_days(i64::MAX).backfill_days, u32::MAX);
    }

    #[test]
    fn defaults() {
        let config = UpdateConfig::default();
        assert_eq!(config.backfill_days, DEFAULT_BACKFILL_DAYS);
        assert!(!config.full_redownload);
        assert_eq!(config.request_interval, Some(DEFAULT_REQUEST_INTERVAL));
        assert!(config.end.is_none());
    }
}
