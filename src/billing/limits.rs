//! Per-tier quota tables
//!
//! Trial users get a small daily allowance once the sneak peek is over;
//! full-access users get weekly caps on the expensive categories only.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

use super::clock::Clock;
use super::types::{Quota, SubscriptionTier, UsageCategory};

/// Which tier lineage a tracker counts usage for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerKind {
    Trial,
    Full,
}

impl TrackerKind {
    /// Tracker used by a tier, if that tier is tracked at all
    pub fn for_tier(tier: SubscriptionTier) -> Option<Self> {
        match tier {
            SubscriptionTier::Trial => Some(Self::Trial),
            SubscriptionTier::Full => Some(Self::Full),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trial => write!(f, "trial"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Length and alignment of a quota window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaWindow {
    /// Local calendar day
    Day,
    /// Local calendar week
    Week,
}

impl QuotaWindow {
    /// Whether `window_start` and `now` fall in the same window
    pub fn contains(&self, clock: &dyn Clock, window_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Day => clock.is_same_day(window_start, now),
            Self::Week => clock.is_same_week(window_start, now),
        }
    }

    /// Start of the window following the one containing `at`
    pub fn next_start(&self, clock: &dyn Clock, at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Day => clock.start_of_next_day(at),
            Self::Week => clock.start_of_next_week(at),
        }
    }
}

/// Maximum uses per category within one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    window: QuotaWindow,
    limits: BTreeMap<UsageCategory, Quota>,
}

impl QuotaPolicy {
    pub fn new(window: QuotaWindow, limits: impl IntoIterator<Item = (UsageCategory, Quota)>) -> Self {
        Self {
            window,
            limits: limits.into_iter().collect(),
        }
    }

    /// Trial allowance after the sneak peek, per calendar day
    pub fn trial() -> Self {
        Self::new(
            QuotaWindow::Day,
            [
                (UsageCategory::SelfInsight, Quota::Limited(3)),
                (UsageCategory::DateInsight, Quota::Limited(2)),
                (UsageCategory::Relationship, Quota::Limited(2)),
                (UsageCategory::SouthNode, Quota::Limited(1)),
            ],
        )
    }

    /// Full-access allowance, per calendar week
    pub fn full() -> Self {
        Self::new(
            QuotaWindow::Week,
            [
                (UsageCategory::SelfInsight, Quota::Unbounded),
                (UsageCategory::DateInsight, Quota::Unbounded),
                (UsageCategory::Relationship, Quota::Limited(3)),
                (UsageCategory::SouthNode, Quota::Limited(2)),
            ],
        )
    }

    pub fn for_kind(kind: TrackerKind) -> Self {
        match kind {
            TrackerKind::Trial => Self::trial(),
            TrackerKind::Full => Self::full(),
        }
    }

    pub fn window(&self) -> QuotaWindow {
        self.window
    }

    /// Quota for a category. Categories missing from the table are unbounded.
    pub fn max(&self, category: UsageCategory) -> Quota {
        match self.limits.get(&category) {
            Some(quota) => *quota,
            None => {
                warn!(
                    category = %category,
                    "No quota configured for category, allowing unlimited use"
                );
                Quota::Unbounded
            }
        }
    }
}
