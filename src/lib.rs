//! Local entitlement and usage-quota engine.
//!
//! Decides whether a gated feature category may be used right now for
//! the current subscription tier, and tracks consumption across renewing
//! daily and weekly windows.

pub mod billing;
pub mod config;

pub use billing::{
    EntitlementGate, EntitlementState, LimitCheckResult, Remaining, SubscriptionTier,
    UsageCategory, UsageSnapshot,
};
pub use config::EntitlementConfig;

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Default: warn for most crates, info for this one. Does nothing if the
/// host already installed a global subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,entitlements=info")),
        )
        .try_init();
}
