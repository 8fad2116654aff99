//! Quota Types
//!
//! User identifiers, per-user quota records and the bounds every quota value
//! must respect.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque, stable user identifier.
///
/// Chat platforms hand out integer ids; other callers may use strings. Both
/// are stored in their decimal/text form.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Quota fields as they sit in the store.
///
/// `quota` is signed so that a corrupted or stale value (for example after
/// `max_quota` was lowered between runs) is still visible to the controller,
/// which clamps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaState {
    /// Remaining admissions
    pub quota: i64,

    /// A recovery chain is active for this user
    pub recovering: bool,
}

/// Full persisted record for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// User the record belongs to
    pub user_id: UserId,

    /// Remaining admissions
    pub quota: i64,

    /// A recovery chain is active for this user
    pub recovering: bool,

    /// Time of the last committed mutation
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl QuotaRecord {
    /// Quota and flag without the bookkeeping fields
    pub fn state(&self) -> QuotaState {
        QuotaState {
            quota: self.quota,
            recovering: self.recovering,
        }
    }
}

/// Process-wide quota parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Quota of a fresh or fully recovered user
    pub max_quota: u32,

    /// Delay between two recovery increments
    pub recovery_interval: Duration,
}

impl QuotaPolicy {
    /// Create a policy. Bounds are enforced by config validation.
    pub fn new(max_quota: u32, recovery_interval: Duration) -> Self {
        Self {
            max_quota,
            recovery_interval,
        }
    }

    /// Clamp a stored quota into `[0, max_quota]`.
    ///
    /// Returns the clamped value and whether clamping was needed.
    pub fn clamp(&self, raw: i64) -> (u32, bool) {
        if raw < 0 {
            (0, true)
        } else if raw > i64::from(self.max_quota) {
            (self.max_quota, true)
        } else {
            (raw as u32, false)
        }
    }

    /// Upper bound on the time a recovery chain needs to refill an empty quota
    pub fn full_recovery_time(&self) -> Duration {
        self.recovery_interval * self.max_quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> QuotaPolicy {
        QuotaPolicy::new(3, Duration::from_secs(5))
    }

    #[test]
    fn test_user_id_from_integer() {
        let id = UserId::from(123456789_i64);
        assert_eq!(id.as_str(), "123456789");
        assert_eq!(id, UserId::from("123456789"));
    }

    #[test]
    fn test_user_id_display() {
        assert_eq!(UserId::new("alice").to_string(), "alice");
    }

    #[test]
    fn test_clamp_in_range() {
        assert_eq!(policy().clamp(0), (0, false));
        assert_eq!(policy().clamp(2), (2, false));
        assert_eq!(policy().clamp(3), (3, false));
    }

    #[test]
    fn test_clamp_out_of_range() {
        assert_eq!(policy().clamp(-4), (0, true));
        assert_eq!(policy().clamp(10), (3, true));
    }

    #[test]
    fn test_full_recovery_time() {
        assert_eq!(policy().full_recovery_time(), Duration::from_secs(15));
    }

    #[test]
    fn test_user_id_serializes_as_string() {
        let json = serde_json::to_string(&UserId::from(42_i64)).unwrap();
        assert_eq!(json, "\"42\"");
    }
}
