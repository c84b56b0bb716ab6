use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between diagnostic snapshots while a reply streams.
pub const DIAGNOSTICS_INTERVAL: Duration = Duration::from_millis(2000);

/// Lets an action through at most once per interval.
#[derive(Debug, Clone)]
pub struct RateGate {
    interval: Duration,
    last: Option<Instant>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True when the interval has passed since the last accepted check.
    pub fn should_check(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(DIAGNOSTICS_INTERVAL)
    }
}
