//! Billing module for entitlement decisions and usage quotas
//!
//! This module handles:
//! - Subscription tier state (Trial/TrialExpired/Full/Premium/IntroOffer)
//! - The 24-hour trial sneak peek
//! - Daily trial quotas and weekly full-access quotas per category
//! - Durable counters behind a key-value store

mod clock;
mod gate;
mod limits;
mod locks;
mod store;
mod trial;
mod types;
mod usage;


pub use clock::{start_of_day_in, start_of_week_in, Clock, ManualClock, SystemClock};
pub use gate::EntitlementGate;
pub use limits::{QuotaPolicy, QuotaWindow, TrackerKind};
pub use store::{keys, MemoryStore, Result, SqliteStore, StoreError, UsageStore};
pub use trial::{TrialState, FORCE_EXPIRE_HOURS, SNEAK_PEEK_HOURS};
pub use types::{
    CategoryUsage, LimitCheckResult, LimitDenialReason, Quota, Remaining, SubscriptionTier,
    UsageCategory, UsageSnapshot, UNBOUNDED_DISPLAY_COUNT,
};
pub use usage::UsageTracker;

use std::sync::Arc;

use crate::config::EntitlementConfig;

/// Entitlement state shared with the host application
pub struct EntitlementState {
    pub config: EntitlementConfig,
    pub gate: Arc<EntitlementGate>,
}

impl EntitlementState {
    /// Open the SQLite-backed gate described by `config`
    pub fn new(config: EntitlementConfig, initial_tier: SubscriptionTier) -> Result<Self> {
        let gate = Arc::new(EntitlementGate::open(&config, initial_tier)?);
        Ok(Self { config, gate })
    }

    /// Load the configuration from the environment, then open the gate
    pub fn from_env(initial_tier: SubscriptionTier) -> Result<Self> {
        Self::new(EntitlementConfig::from_env()?, initial_tier)
    }
}
