//! Pause between writes of a sync run.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Slowest the throttle will ever get after rate-limit backoff.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Cooperative rate limiter for sequential writes.
///
/// Waits a fixed delay after each successful write. With backoff enabled,
/// every rate-limit error doubles the delay for the rest of the run, up to
/// [`MAX_DELAY`]. Failed writes are never retried here.
#[derive(Debug)]
pub struct WriteThrottle {
    current: Duration,
    backoff: bool,
    rate_limit_hits: u32,
}

impl WriteThrottle {
    pub fn new(delay: Duration, backoff_on_rate_limit: bool) -> Self {
        Self {
            current: delay,
            backoff: backoff_on_rate_limit,
            rate_limit_hits: 0,
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Wait out the delay after a successful write. Returns early on cancellation.
    pub async fn after_write(&self, cancel: &CancellationToken) {
        if self.current.is_zero() {
            return;
        }
        debug!(delay_ms = self.current.as_millis() as u64, "Pausing before next write");
        tokio::select! {
            _ = tokio::time::sleep(self.current) => {}
            _ = cancel.cancelled() => {}
        }
    }

    /// Note an HTTP 429 from the remote.
    pub fn report_rate_limited(&mut self) {
        self.rate_limit_hits += 1;
        if !self.backoff {
            warn!(hits = self.rate_limit_hits, "Remote rate limited a write, backoff disabled");
            return;
        }

        let old = self.current;
        let start = if old.is_zero() { Duration::from_millis(500) } else { old };
        self.current = (start * 2).min(MAX_DELAY);
        warn!(
            old_delay_ms = old.as_millis() as u64,
            new_delay_ms = self.current.as_millis() as u64,
            hits = self.rate_limit_hits,
            "Rate limited by remote, backing off"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut throttle = WriteThrottle::new(Duration::from_secs(20), true);
        throttle.report_rate_limited();
        assert_eq!(throttle.current_delay(), Duration::from_secs(40));
        throttle.report_rate_limited();
        assert_eq!(throttle.current_delay(), MAX_DELAY);
    }

    #[test]
    fn test_backoff_disabled_keeps_delay() {
        let mut throttle = WriteThrottle::new(Duration::from_millis(500), false);
        throttle.report_rate_limited();
        assert_eq!(throttle.current_delay(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_cancel_cuts_pause_short() {
        let throttle = WriteThrottle::new(Duration::from_secs(30), false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), throttle.after_write(&cancel))
            .await
            .unwrap();
    }
}
