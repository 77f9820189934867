//! Trial lifecycle
//!
//! A trial starts the first time its status is consulted. The first 24
//! hours are a sneak peek with unlimited, uncounted access; afterwards
//! the trial lives on only while the trial tracker has quota left.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tracing::info;

use super::clock::Clock;
use super::locks::acquire_lock;
use super::store::{keys, Result, UsageStore};

/// Length of the unlimited sneak-peek window, in hours
pub const SNEAK_PEEK_HOURS: i64 = 24;

/// How far back `force_expire` pins the trial start, in hours
pub const FORCE_EXPIRE_HOURS: i64 = 25;

fn sneak_peek_duration() -> Duration {
    Duration::hours(SNEAK_PEEK_HOURS)
}

/// Derives trial facts from the persisted trial start
pub struct TrialState {
    clock: Arc<dyn Clock>,
    store: Arc<dyn UsageStore>,
    // Serializes the first-start write
    start_lock: Mutex<()>,
}

impl TrialState {
    pub fn new(clock: Arc<dyn Clock>, store: Arc<dyn UsageStore>) -> Self {
        Self {
            clock,
            store,
            start_lock: Mutex::new(()),
        }
    }

    /// Persist the trial start if none exists yet and return it
    pub fn ensure_started(&self) -> Result<DateTime<Utc>> {
        let _guard = acquire_lock(&self.start_lock);
        if let Some(start) = self.store.get_instant(keys::TRIAL_START)? {
            return Ok(start);
        }

        let start = self.clock.now();
        self.store.set_instant(keys::TRIAL_START, start)?;
        info!(started_at = %start, "Trial started");
        Ok(start)
    }

    pub fn sneak_peek_ends_at(&self) -> Result<DateTime<Utc>> {
        Ok(self.ensure_started()? + sneak_peek_duration())
    }

    /// `start <= now < start + 24h`
    pub fn is_in_sneak_peek(&self) -> Result<bool> {
        let start = self.ensure_started()?;
        let now = self.clock.now();
        Ok(start <= now && now < start + sneak_peek_duration())
    }

    /// Trial is alive during the sneak peek or while any category has uses left
    pub fn is_active(&self, has_any_remaining_use: bool) -> Result<bool> {
        Ok(self.is_in_sneak_peek()? || has_any_remaining_use)
    }

    /// Pin the trial start 25 hours in the past. Debug and support tooling only.
    pub fn force_expire(&self) -> Result<()> {
        let _guard = acquire_lock(&self.start_lock);
        let start = self.clock.now() - Duration::hours(FORCE_EXPIRE_HOURS);
        self.store.set_instant(keys::TRIAL_START, start)?;
        info!(started_at = %start, "Trial start forced into the past");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::clock::ManualClock;
    use crate::billing::store::MemoryStore;
    use chrono::TimeZone;

    fn setup() -> (Arc<ManualClock>, Arc<MemoryStore>, TrialState) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new());
        let trial = TrialState::new(clock.clone(), store.clone());
        (clock, store, trial)
    }

    #[test]
    fn test_trial_starts_once() {
        let (clock, store, trial) = setup();
        let first = trial.ensure_started().unwrap();
        assert_eq!(first, clock.now());

        clock.advance(Duration::hours(3));
        assert_eq!(trial.ensure_started().unwrap(), first);
        assert_eq!(store.get_instant(keys::TRIAL_START).unwrap(), Some(first));
    }

    #[test]
    fn test_sneak_peek_boundary() {
        let (clock, _store, trial) = setup();
        let start = trial.ensure_started().unwrap();

        assert!(trial.is_in_sneak_peek().unwrap());

        clock.set(start + sneak_peek_duration() - Duration::nanoseconds(1));
        assert!(trial.is_in_sneak_peek().unwrap());

        clock.set(start + sneak_peek_duration());
        assert!(!trial.is_in_sneak_peek().unwrap());
        assert_eq!(trial.sneak_peek_ends_at().unwrap(), start + sneak_peek_duration());
    }

    #[test]
    fn test_clock_before_start_is_not_sneak_peek() {
        let (clock, _store, trial) = setup();
        let start = trial.ensure_started().unwrap();
        clock.set(start - Duration::minutes(1));
        assert!(!trial.is_in_sneak_peek().unwrap());
    }

    #[test]
    fn test_is_active() {
        let (clock, _store, trial) = setup();
        assert!(trial.is_active(false).unwrap());

        clock.advance(Duration::hours(30));
        assert!(!trial.is_active(false).unwrap());
        assert!(trial.is_active(true).unwrap());
    }

    #[test]
    fn test_force_expire() {
        let (clock, store, trial) = setup();
        trial.ensure_started().unwrap();
        trial.force_expire().unwrap();

        assert_eq!(
            store.get_instant(keys::TRIAL_START).unwrap(),
            Some(clock.now() - Duration::hours(FORCE_EXPIRE_HOURS))
        );
        assert!(!trial.is_in_sneak_peek().unwrap());
    }
}
