use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};

use super::backend::Backend;
use crate::Result;

/// Periodic link-health poller.
///
/// Only ticks while armed: the supervisor disarms it during recovery and
/// re-arms it once the device is registered again.
pub struct HealthMonitor {
    backend: Arc<dyn Backend>,
    ticker: Interval,
    armed: bool,
}

impl HealthMonitor {
    pub fn new(backend: Arc<dyn Backend>, period: Duration) -> Self {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            backend,
            ticker,
            armed: false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Start polling; the first poll is one period from now.
    pub fn arm(&mut self) {
        self.ticker.reset();
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Wait for the next poll time.
    pub async fn tick(&mut self) {
        self.ticker.tick().await;
    }

    /// Run one health poll.
    pub async fn poll(&self) -> Result<()> {
        self.backend.health().await
    }
}
