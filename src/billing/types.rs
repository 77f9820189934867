//! Billing data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Remaining-uses figure shown in the UI when a category has no cap
pub const UNBOUNDED_DISPLAY_COUNT: u32 = 999;

/// Subscription tier
///
/// Exactly one tier is current at any instant. `Premium` and `IntroOffer`
/// are unlimited and never tracked; `TrialExpired` denies everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionTier {
    #[default]
    Trial,
    TrialExpired,
    Full,
    Premium,
    IntroOffer,
}

impl SubscriptionTier {
    /// Tiers with no quota at all
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Premium | Self::IntroOffer)
    }

    /// Tiers whose usage is counted by a tracker
    pub fn is_tracked(&self) -> bool {
        matches!(self, Self::Trial | Self::Full)
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trial => write!(f, "trial"),
            Self::TrialExpired => write!(f, "trialExpired"),
            Self::Full => write!(f, "full"),
            Self::Premium => write!(f, "premium"),
            Self::IntroOffer => write!(f, "introOffer"),
        }
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(Self::Trial),
            "trialExpired" | "trial_expired" => Ok(Self::TrialExpired),
            "full" => Ok(Self::Full),
            "premium" => Ok(Self::Premium),
            "introOffer" | "intro_offer" => Ok(Self::IntroOffer),
            other => Err(format!("Unknown subscription tier: {}", other)),
        }
    }
}

/// Gated feature area with its own independent quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageCategory {
    SelfInsight,
    DateInsight,
    Relationship,
    SouthNode,
}

impl UsageCategory {
    pub const ALL: [UsageCategory; 4] = [
        Self::SelfInsight,
        Self::DateInsight,
        Self::Relationship,
        Self::SouthNode,
    ];

    /// Stable identifier used in persistence keys
    pub fn key_name(&self) -> &'static str {
        match self {
            Self::SelfInsight => "selfInsight",
            Self::DateInsight => "dateInsight",
            Self::Relationship => "relationship",
            Self::SouthNode => "southNode",
        }
    }
}

impl std::fmt::Display for UsageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key_name())
    }
}

impl FromStr for UsageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.key_name() == s)
            .ok_or_else(|| format!("Unknown usage category: {}", s))
    }
}

/// Maximum uses of a category within one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "max")]
pub enum Quota {
    Unbounded,
    Limited(u32),
}

impl Quota {
    /// Whether `used` uses still leave room for one more
    pub fn allows(&self, used: u32) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Limited(max) => used < *max,
        }
    }

    /// Uses left after `used`, never negative
    pub fn remaining(&self, used: u32) -> Remaining {
        match self {
            Self::Unbounded => Remaining::Unbounded,
            Self::Limited(max) => Remaining::Limited(max.saturating_sub(used)),
        }
    }
}

/// Uses left in the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "count")]
pub enum Remaining {
    Unbounded,
    Limited(u32),
}

impl Remaining {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Limited(0))
    }

    /// Numeric figure for surfaces that cannot render "no cap"
    pub fn display_count(&self) -> u32 {
        match self {
            Self::Unbounded => UNBOUNDED_DISPLAY_COUNT,
            Self::Limited(n) => *n,
        }
    }
}

/// Result of a limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum LimitCheckResult {
    #[serde(rename = "allowed")]
    Allowed { remaining: Remaining },
    #[serde(rename = "denied")]
    Denied { reason: LimitDenialReason },
}

impl LimitCheckResult {
    /// Check if the action is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Get the denial reason if denied
    pub fn denial_reason(&self) -> Option<&LimitDenialReason> {
        match self {
            Self::Denied { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Reason for denying an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum LimitDenialReason {
    #[serde(rename = "trialExpired")]
    TrialExpired,
    #[serde(rename = "quotaExhausted")]
    #[serde(rename_all = "camelCase")]
    QuotaExhausted {
        category: UsageCategory,
        limit: u32,
        used: u32,
        resets_at: DateTime<Utc>,
    },
}

impl std::fmt::Display for LimitDenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrialExpired => write!(f, "Free trial has ended"),
            Self::QuotaExhausted {
                category,
                limit,
                used,
                resets_at,
            } => {
                write!(
                    f,
                    "Quota exhausted for {}: {}/{} uses, resets at {}",
                    category,
                    used,
                    limit,
                    resets_at.to_rfc3339()
                )
            }
        }
    }
}

/// Usage of a single category, for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUsage {
    pub category: UsageCategory,
    pub used: u32,
    /// `None` when the tier has no quota concept
    pub remaining: Option<Remaining>,
}

/// Response with tier and per-category usage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub tier: SubscriptionTier,
    pub in_sneak_peek: bool,
    pub sneak_peek_ends_at: Option<DateTime<Utc>>,
    /// Start of the next quota window for tracked tiers
    pub resets_at: Option<DateTime<Utc>>,
    pub categories: Vec<CategoryUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_round_trips_through_display() {
        for tier in [
            SubscriptionTier::Trial,
            SubscriptionTier::TrialExpired,
            SubscriptionTier::Full,
            SubscriptionTier::Premium,
            SubscriptionTier::IntroOffer,
        ] {
            assert_eq!(tier.to_string().parse::<SubscriptionTier>(), Ok(tier));
        }
        assert!("gold".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn test_tier_classification() {
        assert!(SubscriptionTier::Premium.is_unlimited());
        assert!(SubscriptionTier::IntroOffer.is_unlimited());
        assert!(!SubscriptionTier::Full.is_unlimited());
        assert!(SubscriptionTier::Trial.is_tracked());
        assert!(SubscriptionTier::Full.is_tracked());
        assert!(!SubscriptionTier::TrialExpired.is_tracked());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(
            "southNode".parse::<UsageCategory>(),
            Ok(UsageCategory::SouthNode)
        );
        assert!("south_node".parse::<UsageCategory>().is_err());
    }

    #[test]
    fn test_quota_remaining_saturates() {
        let quota = Quota::Limited(2);
        assert!(quota.allows(1));
        assert!(!quota.allows(2));
        assert_eq!(quota.remaining(5), Remaining::Limited(0));
        assert_eq!(Quota::Unbounded.remaining(5), Remaining::Unbounded);
    }

    #[test]
    fn test_remaining_display_count() {
        assert_eq!(Remaining::Unbounded.display_count(), 999);
        assert_eq!(Remaining::Limited(2).display_count(), 2);
        assert!(Remaining::Limited(0).is_exhausted());
        assert!(!Remaining::Unbounded.is_exhausted());
    }

    #[test]
    fn test_limit_check_serialization() {
        let allowed = LimitCheckResult::Allowed {
            remaining: Remaining::Limited(2),
        };
        let json = serde_json::to_value(&allowed).unwrap();
        assert_eq!(json["type"], "allowed");
        assert_eq!(json["remaining"]["type"], "limited");
        assert_eq!(json["remaining"]["count"], 2);

        let denied = LimitCheckResult::Denied {
            reason: LimitDenialReason::TrialExpired,
        };
        let json = serde_json::to_value(&denied).unwrap();
        assert_eq!(json["type"], "denied");
        assert_eq!(json["reason"]["type"], "trialExpired");
        assert!(!denied.is_allowed());
        assert_eq!(denied.denial_reason(), Some(&LimitDenialReason::TrialExpired));
    }
}
