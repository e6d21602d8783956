use crate::config::ClientSettings;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

const MAX_DELAY: Duration = Duration::from_secs(300);

/// Spaces requests evenly so no more than `limit` are sent per minute.
pub struct Throttle {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            min_interval: Duration::from_secs_f64(60.0 / f64::from(limit.max(1))),
            last_request: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Sleeps until the next request is allowed and records it as sent.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub total: u32,
    pub backoff_factor: f64,
    pub status_forcelist: Vec<u16>,
}

impl RetryPolicy {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            total: settings.retry_total,
            backoff_factor: settings.retry_backoff_factor,
            status_forcelist: settings.retry_status_forcelist.clone(),
        }
    }

    pub fn retries_status(&self, status: StatusCode) -> bool {
        self.status_forcelist.contains(&status.as_u16())
    }

    /// Delay before retry number `attempt` (0-based); a server-provided
    /// `Retry-After` replaces the exponential backoff. Both are capped at five minutes.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(MAX_DELAY);
        }
        let factor = 2f64.powi(attempt.min(16) as i32);
        Duration::try_from_secs_f64(self.backoff_factor * factor)
            .map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY))
    }
}

/// Reads a `Retry-After` header given in seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
