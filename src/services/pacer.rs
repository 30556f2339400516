use log::debug;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces outbound requests at least `interval` apart across every worker
/// sharing it. It paces requests; it does not serialize them.
pub struct RequestPacer {
    interval: Option<Duration>,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval: interval.filter(|i| !i.is_zero()),
            next_slot: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// 等待请求频率限制
    pub async fn wait(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let wait_time = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            // reserve the slot before releasing the lock
            *next = Some(slot + interval);
            slot.saturating_duration_since(now)
        };

        if !wait_time.is_zero() {
            debug!("等待 {:?} 以遵守频率限制", wait_time);
            tokio::time::sleep(wait_time).await;
        }
    }
}
