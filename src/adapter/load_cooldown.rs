//! Availability gate for adapters that load weights lazily.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Remembers the last failed load so the owning adapter reports itself
/// unavailable only until `retry_after` has passed, after which the next
/// call attempts the load again.
pub(crate) struct LoadCooldown {
    retry_after: Duration,
    failed_at: Mutex<Option<Instant>>,
}

impl LoadCooldown {
    pub(crate) fn new(retry_after: Duration) -> Self {
        Self {
            retry_after,
            failed_at: Mutex::new(None),
        }
    }

    pub(crate) fn record(&self, loaded: bool) {
        self.record_at(loaded, Instant::now());
    }

    fn record_at(&self, loaded: bool, now: Instant) {
        *self.failed_at.lock().unwrap_or_else(PoisonError::into_inner) =
            if loaded { None } else { Some(now) };
    }

    /// Whether a load may be attempted now.
    pub(crate) fn ready(&self) -> bool {
        self.ready_at(Instant::now())
    }

    fn ready_at(&self, now: Instant) -> bool {
        match *self.failed_at.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(failed) => now.saturating_duration_since(failed) >= self.retry_after,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_until_a_load_fails() {
        let gate = LoadCooldown::new(Duration::from_secs(30));
        assert!(gate.ready());
        gate.record(true);
        assert!(gate.ready());
    }

    #[test]
    fn failure_blocks_only_for_the_cooldown() {
        let gate = LoadCooldown::new(Duration::from_secs(30));
        let failed = Instant::now();
        gate.record_at(false, failed);

        assert!(!gate.ready_at(failed));
        assert!(!gate.ready_at(failed + Duration::from_secs(29)));
        assert!(gate.ready_at(failed + Duration::from_secs(30)));
    }

    #[test]
    fn successful_retry_clears_the_failure() {
        let gate = LoadCooldown::new(Duration::from_secs(30));
        let failed = Instant::now();
        gate.record_at(false, failed);
        gate.record_at(true, failed + Duration::from_secs(31));
        assert!(gate.ready_at(failed + Duration::from_secs(31)));
        assert!(gate.ready());
    }

    #[test]
    fn zero_cooldown_retries_immediately() {
        let gate = LoadCooldown::new(Duration::ZERO);
        gate.record(false);
        assert!(gate.ready());
    }
}
