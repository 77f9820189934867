//! Windowed usage counters
//!
//! One tracker exists per tracked tier lineage (trial and full access).
//! Every public operation first checks whether the quota window has
//! rolled over and, if so, zeroes all category counters together before
//! doing anything else. The check, the read and the write happen under
//! one lock so concurrent callers cannot both claim the last use.
//!
//! Note: window boundaries come from the injected [`Clock`], which uses
//! the user's local calendar rather than UTC.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::clock::Clock;
use super::limits::{QuotaPolicy, TrackerKind};
use super::locks::acquire_lock;
use super::store::{keys, Result, UsageStore};
use super::types::{Quota, Remaining, UsageCategory};

/// Usage tracker for one tier lineage
pub struct UsageTracker {
    kind: TrackerKind,
    policy: QuotaPolicy,
    clock: Arc<dyn Clock>,
    store: Arc<dyn UsageStore>,
    lock: Mutex<()>,
}

impl UsageTracker {
    /// Tracker with the built-in policy for `kind`
    pub fn new(kind: TrackerKind, clock: Arc<dyn Clock>, store: Arc<dyn UsageStore>) -> Self {
        Self::with_policy(kind, QuotaPolicy::for_kind(kind), clock, store)
    }

    pub fn with_policy(
        kind: TrackerKind,
        policy: QuotaPolicy,
        clock: Arc<dyn Clock>,
        store: Arc<dyn UsageStore>,
    ) -> Self {
        Self {
            kind,
            policy,
            clock,
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Whether one more use of `category` fits in the current window
    pub fn can_use(&self, category: UsageCategory) -> Result<bool> {
        let _guard = acquire_lock(&self.lock);
        self.reset_if_needed()?;
        Ok(self.policy.max(category).allows(self.count(category)?))
    }

    /// Record one use. Ignored when the category is already at its limit.
    pub fn increment(&self, category: UsageCategory) -> Result<()> {
        self.try_consume(category).map(|_| ())
    }

    /// Record one use if allowed, reporting whether it was recorded
    pub fn try_consume(&self, category: UsageCategory) -> Result<bool> {
        let _guard = acquire_lock(&self.lock);
        self.reset_if_needed()?;

        let used = self.count(category)?;
        if !self.policy.max(category).allows(used) {
            debug!(
                tracker = %self.kind,
                category = %category,
                used,
                "Quota reached, use not recorded"
            );
            return Ok(false);
        }

        let key = keys::usage_count(self.kind, category);
        self.store.set_int(&key, i64::from(used.saturating_add(1)))?;
        debug!(tracker = %self.kind, category = %category, used = used + 1, "Incremented usage");
        Ok(true)
    }

    /// Uses left in the current window
    pub fn remaining_uses(&self, category: UsageCategory) -> Result<Remaining> {
        let _guard = acquire_lock(&self.lock);
        self.reset_if_needed()?;
        Ok(self.policy.max(category).remaining(self.count(category)?))
    }

    /// Uses recorded in the current window
    pub fn used(&self, category: UsageCategory) -> Result<u32> {
        let _guard = acquire_lock(&self.lock);
        self.reset_if_needed()?;
        self.count(category)
    }

    /// Whether any category still has a use left
    pub fn has_any_remaining(&self) -> Result<bool> {
        let _guard = acquire_lock(&self.lock);
        self.reset_if_needed()?;
        for category in UsageCategory::ALL {
            if !self.policy.max(category).remaining(self.count(category)?).is_exhausted() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn window_start(&self) -> Result<DateTime<Utc>> {
        let _guard = acquire_lock(&self.lock);
        self.reset_if_needed()?;
        Ok(self
            .store
            .get_instant(keys::window_start(self.kind))?
            .unwrap_or_else(|| self.clock.now()))
    }

    /// When the current window ends and counters go back to zero
    pub fn next_reset(&self) -> Result<DateTime<Utc>> {
        let start = self.window_start()?;
        Ok(self.policy.window().next_start(self.clock.as_ref(), start))
    }

    /// Fill every capped category to its maximum and restart the window now.
    /// Used when force-expiring a trial.
    pub fn saturate(&self) -> Result<()> {
        let _guard = acquire_lock(&self.lock);
        for category in UsageCategory::ALL {
            if let Quota::Limited(max) = self.policy.max(category) {
                self.store
                    .set_int(&keys::usage_count(self.kind, category), i64::from(max))?;
            }
        }
        self.store
            .set_instant(keys::window_start(self.kind), self.clock.now())?;
        debug!(tracker = %self.kind, "Saturated all counters");
        Ok(())
    }

    /// Zero all counters when the window has rolled over. Caller holds the lock.
    fn reset_if_needed(&self) -> Result<()> {
        let now = self.clock.now();
        match self.store.get_instant(keys::window_start(self.kind))? {
            Some(start) if self.policy.window().contains(self.clock.as_ref(), start, now) => {
                Ok(())
            }
            Some(start) => {
                debug!(
                    tracker = %self.kind,
                    window_start = %start,
                    "Quota window rolled over, resetting counters"
                );
                self.reset_counters(now)
            }
            None => self.reset_counters(now),
        }
    }

    fn reset_counters(&self, now: DateTime<Utc>) -> Result<()> {
        // Counters first: a crash before the window write is redone next call
        for category in UsageCategory::ALL {
            self.store.set_int(&keys::usage_count(self.kind, category), 0)?;
        }
        self.store.set_instant(keys::window_start(self.kind), now)
    }

    fn count(&self, category: UsageCategory) -> Result<u32> {
        let key = keys::usage_count(self.kind, category);
        Ok(match self.store.get_int(&key)? {
            None => 0,
            Some(v) if v < 0 => {
                warn!(key = %key, value = v, "Negative usage counter, treating as zero");
                0
            }
            Some(v) => u32::try_from(v).unwrap_or(u32::MAX),
        })
    }
}
