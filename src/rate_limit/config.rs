//! Rate Limit Configuration
//!
//! Configuration for the per-user admission quota.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::quota::QuotaPolicy;

/// Default quota of a fresh user
pub const DEFAULT_MAX_QUOTA: u32 = 5;
/// Default delay between recovery increments
pub const DEFAULT_RECOVERY_INTERVAL_SECS: u64 = 600;

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting. When false every request is admitted and the
    /// store is never touched.
    pub enabled: bool,

    /// Quota of a fresh or fully recovered user
    pub max_quota: u32,

    /// Seconds between recovery increments
    pub recovery_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_quota: DEFAULT_MAX_QUOTA,
            recovery_interval_secs: DEFAULT_RECOVERY_INTERVAL_SECS,
        }
    }
}

impl RateLimitConfig {
    /// Create an enabled configuration with explicit limits
    pub fn new(max_quota: u32, recovery_interval_secs: u64) -> Self {
        Self {
            enabled: true,
            max_quota,
            recovery_interval_secs,
        }
    }

    /// Disable rate limiting
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Get recovery interval
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }

    /// Quota parameters for the admission controller
    pub fn policy(&self) -> QuotaPolicy {
        QuotaPolicy::new(self.max_quota, self.recovery_interval())
    }

    /// Validate limits
    ///
    /// # Errors
    ///
    /// Returns an error if `max_quota` or `recovery_interval_secs` is zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_quota < 1 {
            anyhow::bail!("rate_limit.max_quota must be >= 1 (got {})", self.max_quota);
        }
        if self.recovery_interval_secs < 1 {
            anyhow::bail!(
                "rate_limit.recovery_interval_secs must be >= 1 (got {})",
                self.recovery_interval_secs
            );
        }
        Ok(())
    }
}
