//! Entitlement gate
//!
//! Holds the current subscription tier and routes every "may this
//! category be used now?" question to the right place: unlimited tiers
//! short-circuit, `TrialExpired` denies, and `Trial`/`Full` delegate to
//! their usage trackers. The tier only changes through `update_tier`
//! (pushed by the purchase resolver) and the one internal transition
//! `Trial -> TrialExpired` in `refresh`.

use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::limits::TrackerKind;
use super::locks::{acquire_read_lock, acquire_write_lock};
use super::store::{Result, SqliteStore, UsageStore};
use super::trial::TrialState;
use super::types::{
    CategoryUsage, LimitCheckResult, LimitDenialReason, Quota, Remaining, SubscriptionTier,
    UsageCategory, UsageSnapshot,
};
use super::usage::UsageTracker;
use crate::config::EntitlementConfig;

/// Façade answering entitlement questions for the current tier
pub struct EntitlementGate {
    tier: RwLock<SubscriptionTier>,
    trial: TrialState,
    trial_usage: UsageTracker,
    full_usage: UsageTracker,
}

impl EntitlementGate {
    pub fn new(
        initial_tier: SubscriptionTier,
        clock: Arc<dyn Clock>,
        store: Arc<dyn UsageStore>,
    ) -> Self {
        Self {
            tier: RwLock::new(initial_tier),
            trial: TrialState::new(clock.clone(), store.clone()),
            trial_usage: UsageTracker::new(TrackerKind::Trial, clock.clone(), store.clone()),
            full_usage: UsageTracker::new(TrackerKind::Full, clock, store),
        }
    }

    /// Gate backed by the SQLite store and local calendar from `config`
    pub fn open(config: &EntitlementConfig, initial_tier: SubscriptionTier) -> Result<Self> {
        let store = SqliteStore::open(&config.db_path)?;
        let clock = SystemClock::new(config.week_start);
        Ok(Self::new(initial_tier, Arc::new(clock), Arc::new(store)))
    }

    pub fn tier(&self) -> SubscriptionTier {
        *acquire_read_lock(&self.tier)
    }

    pub fn trial(&self) -> &TrialState {
        &self.trial
    }

    pub fn trial_tracker(&self) -> &UsageTracker {
        &self.trial_usage
    }

    pub fn full_tracker(&self) -> &UsageTracker {
        &self.full_usage
    }

    /// Apply a tier resolved from purchase state.
    ///
    /// Returning to `Trial` from any other tier is not supported and is ignored.
    pub fn update_tier(&self, new_tier: SubscriptionTier) {
        let mut tier = acquire_write_lock(&self.tier);
        let current = *tier;
        if current == new_tier {
            debug!(tier = %new_tier, "Subscription tier unchanged");
            return;
        }

        if new_tier == SubscriptionTier::Trial {
            warn!(current = %current, "Ignoring unsupported transition back to trial");
            return;
        }

        info!(from = %current, to = %new_tier, "Subscription tier changed");
        *tier = new_tier;
    }

    /// Move `Trial` to `TrialExpired` once the sneak peek is over and no
    /// trial use is left. Returns the tier afterwards.
    pub fn refresh(
        &self,
        is_in_sneak_peek: bool,
        has_any_remaining_trial_use: bool,
    ) -> SubscriptionTier {
        let mut tier = acquire_write_lock(&self.tier);
        let alive = is_in_sneak_peek || has_any_remaining_trial_use;
        if *tier == SubscriptionTier::Trial && !alive {
            info!("Trial ended, no sneak peek or remaining uses");
            *tier = SubscriptionTier::TrialExpired;
        }
        *tier
    }

    /// `refresh` with both facts computed from the trial state and tracker
    pub fn refresh_trial(&self) -> Result<SubscriptionTier> {
        if self.tier() != SubscriptionTier::Trial {
            return Ok(self.tier());
        }
        let in_sneak_peek = self.trial.is_in_sneak_peek()?;
        let has_remaining = self.trial_usage.has_any_remaining()?;
        Ok(self.refresh(in_sneak_peek, has_remaining))
    }

    /// Whether `category` may be used right now
    pub fn can_use(&self, category: UsageCategory) -> Result<bool> {
        let tier = self.tier();
        if tier.is_unlimited() {
            return Ok(true);
        }
        match tier {
            SubscriptionTier::Full => self.full_usage.can_use(category),
            SubscriptionTier::Trial => {
                if self.trial.is_in_sneak_peek()? {
                    return Ok(true);
                }
                self.trial_allows(category)
            }
            _ => Ok(false),
        }
    }

    /// Record a successful use. Sneak-peek uses are not counted.
    pub fn increment(&self, category: UsageCategory) -> Result<()> {
        let tier = self.tier();
        if !tier.is_tracked() {
            return Ok(());
        }
        match tier {
            SubscriptionTier::Trial => {
                if self.trial.is_in_sneak_peek()? {
                    return Ok(());
                }
                self.trial_usage.increment(category)
            }
            _ => self.full_usage.increment(category),
        }
    }

    /// Check and record in one step; `true` means the use was granted
    pub fn try_consume(&self, category: UsageCategory) -> Result<bool> {
        let tier = self.tier();
        if tier.is_unlimited() {
            return Ok(true);
        }
        match tier {
            SubscriptionTier::Full => self.full_usage.try_consume(category),
            SubscriptionTier::Trial => {
                if self.trial.is_in_sneak_peek()? {
                    return Ok(true);
                }
                if !self.trial.is_active(self.trial_usage.has_any_remaining()?)? {
                    return Ok(false);
                }
                self.trial_usage.try_consume(category)
            }
            _ => Ok(false),
        }
    }

    /// Remaining uses for display. `None` when the tier has no quota concept.
    ///
    /// The trial sneak peek is not reflected here: a trial user sees the
    /// daily allowance that applies once it ends. Use `check` for the
    /// effective decision.
    pub fn remaining_uses(&self, category: UsageCategory) -> Result<Option<Remaining>> {
        match self.tracker_for_tier(self.tier()) {
            Some(tracker) => tracker.remaining_uses(category).map(Some),
            None => Ok(None),
        }
    }

    /// Detailed decision for `category`, including why it was denied
    pub fn check(&self, category: UsageCategory) -> Result<LimitCheckResult> {
        let tier = self.tier();
        let tracker = match tier {
            SubscriptionTier::Premium | SubscriptionTier::IntroOffer => {
                return Ok(LimitCheckResult::Allowed {
                    remaining: Remaining::Unbounded,
                });
            }
            SubscriptionTier::TrialExpired => {
                return Ok(LimitCheckResult::Denied {
                    reason: LimitDenialReason::TrialExpired,
                });
            }
            SubscriptionTier::Trial if self.trial.is_in_sneak_peek()? => {
                return Ok(LimitCheckResult::Allowed {
                    remaining: Remaining::Unbounded,
                });
            }
            SubscriptionTier::Trial => &self.trial_usage,
            SubscriptionTier::Full => &self.full_usage,
        };

        let allowed = match tier {
            SubscriptionTier::Trial => self.trial_allows(category)?,
            _ => tracker.can_use(category)?,
        };
        if allowed {
            return Ok(LimitCheckResult::Allowed {
                remaining: tracker.remaining_uses(category)?,
            });
        }

        let limit = match tracker.policy().max(category) {
            Quota::Limited(max) => max,
            Quota::Unbounded => 0,
        };
        Ok(LimitCheckResult::Denied {
            reason: LimitDenialReason::QuotaExhausted {
                category,
                limit,
                used: tracker.used(category)?,
                resets_at: tracker.next_reset()?,
            },
        })
    }

    /// Force the trial past its sneak peek with every trial quota used up.
    /// Debug and support tooling only; follow with `refresh_trial`.
    pub fn force_expire_trial(&self) -> Result<()> {
        self.trial.force_expire()?;
        self.trial_usage.saturate()
    }

    /// Tier and per-category usage for display
    pub fn usage_snapshot(&self) -> Result<UsageSnapshot> {
        let tier = self.tier();
        let (in_sneak_peek, sneak_peek_ends_at) = if tier == SubscriptionTier::Trial {
            (
                self.trial.is_in_sneak_peek()?,
                Some(self.trial.sneak_peek_ends_at()?),
            )
        } else {
            (false, None)
        };

        let tracker = self.tracker_for_tier(tier);
        let resets_at = tracker.map(|t| t.next_reset()).transpose()?;

        let mut categories = Vec::with_capacity(UsageCategory::ALL.len());
        for category in UsageCategory::ALL {
            let (used, remaining) = match tracker {
                Some(t) => (t.used(category)?, Some(t.remaining_uses(category)?)),
                None => (0, None),
            };
            categories.push(CategoryUsage {
                category,
                used,
                remaining,
            });
        }

        Ok(UsageSnapshot {
            tier,
            in_sneak_peek,
            sneak_peek_ends_at,
            resets_at,
            categories,
        })
    }

    /// Post-sneak-peek trial decision: quota left and trial still alive
    fn trial_allows(&self, category: UsageCategory) -> Result<bool> {
        let within_quota = self.trial_usage.can_use(category)?;
        let active = self.trial.is_active(self.trial_usage.has_any_remaining()?)?;
        Ok(within_quota && active)
    }

    fn tracker_for_tier(&self, tier: SubscriptionTier) -> Option<&UsageTracker> {
        match TrackerKind::for_tier(tier)? {
            TrackerKind::Trial => Some(&self.trial_usage),
            TrackerKind::Full => Some(&self.full_usage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::clock::ManualClock;
    use crate::billing::store::MemoryStore;
    use chrono::{DateTime, Duration, TimeZone, Utc, Weekday};
    use tempfile::TempDir;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap()
    }

    fn make_gate(tier: SubscriptionTier) -> (Arc<ManualClock>, EntitlementGate) {
        let clock = Arc::new(ManualClock::new(start()));
        let gate = EntitlementGate::new(tier, clock.clone(), Arc::new(MemoryStore::new()));
        (clock, gate)
    }

    #[test]
    fn test_update_tier() {
        let (_clock, gate) = make_gate(SubscriptionTier::Trial);
        gate.update_tier(SubscriptionTier::Full);
        assert_eq!(gate.tier(), SubscriptionTier::Full);
        gate.update_tier(SubscriptionTier::Premium);
        assert_eq!(gate.tier(), SubscriptionTier::Premium);
        gate.update_tier(SubscriptionTier::Full);
        assert_eq!(gate.tier(), SubscriptionTier::Full);
    }

    #[test]
    fn test_cannot_return_to_trial() {
        let (_clock, gate) = make_gate(SubscriptionTier::TrialExpired);
        gate.update_tier(SubscriptionTier::Trial);
        assert_eq!(gate.tier(), SubscriptionTier::TrialExpired);
    }

    #[test]
    fn test_trial_expired_denies_everything() {
        let (_clock, gate) = make_gate(SubscriptionTier::TrialExpired);
        for category in UsageCategory::ALL {
            assert!(!gate.can_use(category).unwrap());
            assert!(!gate.try_consume(category).unwrap());
            assert_eq!(gate.remaining_uses(category).unwrap(), None);
        }
        assert_eq!(
            gate.check(UsageCategory::SelfInsight).unwrap().denial_reason(),
            Some(&LimitDenialReason::TrialExpired)
        );
    }

    #[test]
    fn test_refresh_keeps_trial_while_alive() {
        let (_clock, gate) = make_gate(SubscriptionTier::Trial);
        assert_eq!(gate.refresh(true, false), SubscriptionTier::Trial);
        assert_eq!(gate.refresh(false, true), SubscriptionTier::Trial);
        assert_eq!(gate.refresh(false, false), SubscriptionTier::TrialExpired);
    }

    #[test]
    fn test_refresh_ignores_other_tiers() {
        let (_clock, gate) = make_gate(SubscriptionTier::Full);
        assert_eq!(gate.refresh(false, false), SubscriptionTier::Full);
    }

    #[test]
    fn test_refresh_trial_computes_inputs() {
        let (clock, gate) = make_gate(SubscriptionTier::Trial);
        assert_eq!(gate.refresh_trial().unwrap(), SubscriptionTier::Trial);

        clock.advance(Duration::hours(25));
        assert_eq!(gate.refresh_trial().unwrap(), SubscriptionTier::Trial);

        gate.trial_tracker().saturate().unwrap();
        assert_eq!(gate.refresh_trial().unwrap(), SubscriptionTier::TrialExpired);
    }

    #[test]
    fn test_check_reports_quota_exhaustion() {
        let (_clock, gate) = make_gate(SubscriptionTier::Full);
        for _ in 0..2 {
            assert!(gate.try_consume(UsageCategory::SouthNode).unwrap());
        }
        assert!(!gate.try_consume(UsageCategory::SouthNode).unwrap());

        let result = gate.check(UsageCategory::SouthNode).unwrap();
        assert!(!result.is_allowed());
        assert_eq!(
            result.denial_reason(),
            Some(&LimitDenialReason::QuotaExhausted {
                category: UsageCategory::SouthNode,
                limit: 2,
                used: 2,
                resets_at: Utc.with_ymd_and_hms(2025, 3, 16, 0, 0, 0).unwrap(),
            })
        );

        assert_eq!(
            gate.check(UsageCategory::Relationship).unwrap(),
            LimitCheckResult::Allowed {
                remaining: Remaining::Limited(3)
            }
        );
    }

    #[test]
    fn test_check_agrees_with_can_use() {
        let (clock, gate) = make_gate(SubscriptionTier::Trial);
        gate.trial().ensure_started().unwrap();
        clock.advance(Duration::hours(24));
        gate.increment(UsageCategory::SouthNode).unwrap();

        for category in UsageCategory::ALL {
            assert_eq!(
                gate.check(category).unwrap().is_allowed(),
                gate.can_use(category).unwrap()
            );
        }
    }

    #[test]
    fn test_check_agrees_with_can_use_for_every_tier() {
        let (clock, gate) = make_gate(SubscriptionTier::Trial);
        gate.trial().ensure_started().unwrap();
        clock.advance(Duration::hours(25));
        gate.trial_tracker().saturate().unwrap();
        gate.full_tracker().saturate().unwrap();

        for tier in [
            SubscriptionTier::Trial,
            SubscriptionTier::Full,
            SubscriptionTier::Premium,
            SubscriptionTier::IntroOffer,
            SubscriptionTier::TrialExpired,
        ] {
            gate.update_tier(tier);
            for category in UsageCategory::ALL {
                let result = gate.check(category).unwrap();
                assert_eq!(
                    result.is_allowed(),
                    gate.can_use(category).unwrap(),
                    "{} / {}",
                    tier,
                    category
                );
                if tier == SubscriptionTier::Trial {
                    assert!(result.denial_reason().is_some());
                }
            }
        }
    }

    #[test]
    fn test_usage_snapshot_for_trial() {
        let (clock, gate) = make_gate(SubscriptionTier::Trial);
        gate.trial().ensure_started().unwrap();
        clock.advance(Duration::hours(25));
        gate.increment(UsageCategory::SelfInsight).unwrap();

        let snapshot = gate.usage_snapshot().unwrap();
        assert_eq!(snapshot.tier, SubscriptionTier::Trial);
        assert!(!snapshot.in_sneak_peek);
        assert_eq!(snapshot.sneak_peek_ends_at, Some(start() + Duration::hours(24)));
        assert_eq!(
            snapshot.resets_at,
            Some(Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap())
        );

        let self_insight = &snapshot.categories[0];
        assert_eq!(self_insight.category, UsageCategory::SelfInsight);
        assert_eq!(self_insight.used, 1);
        assert_eq!(self_insight.remaining, Some(Remaining::Limited(2)));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["tier"], "trial");
        assert_eq!(json["categories"][0]["category"], "selfInsight");
    }

    #[test]
    fn test_usage_snapshot_for_unlimited_tier() {
        let (_clock, gate) = make_gate(SubscriptionTier::Premium);
        let snapshot = gate.usage_snapshot().unwrap();
        assert_eq!(snapshot.resets_at, None);
        assert_eq!(snapshot.sneak_peek_ends_at, None);
        assert!(snapshot.categories.iter().all(|c| c.remaining.is_none()));
    }

    #[test]
    fn test_open_persists_across_restarts() {
        let dir = TempDir::new().unwrap();
        let config = EntitlementConfig {
            db_path: dir.path().join("usage.db"),
            week_start: Weekday::Mon,
        };

        {
            let gate = EntitlementGate::open(&config, SubscriptionTier::Full).unwrap();
            gate.increment(UsageCategory::Relationship).unwrap();
        }

        let gate = EntitlementGate::open(&config, SubscriptionTier::Full).unwrap();
        assert_eq!(gate.full_tracker().used(UsageCategory::Relationship).unwrap(), 1);
        assert_eq!(
            gate.remaining_uses(UsageCategory::Relationship).unwrap(),
            Some(Remaining::Limited(2))
        );
    }
}
