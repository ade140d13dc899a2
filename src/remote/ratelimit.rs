use crate::cancel::CancellationToken;
use crate::error::{Result, StatError};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Token bucket with a burst of one, shared by every outbound call of a run.
///
/// Each caller reserves the next free slot under the lock and then sleeps
/// until it, so waiters are served in reservation order at `rate` per second.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `per_second == 0` disables limiting.
    pub fn new(per_second: u32) -> Self {
        let interval = if per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / per_second
        };
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    fn reserve(&self) -> Instant {
        let now = Instant::now();
        let mut next = self.next_slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(slot + self.interval);
        slot
    }

    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        if self.interval.is_zero() {
            return Ok(());
        }
        let slot = self.reserve();
        if slot <= Instant::now() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep_until(slot) => Ok(()),
            _ = cancel.cancelled() => Err(StatError::Cancelled),
        }
    }
}
