//! Admin Dashboard Support
//!
//! Aggregate view of every quota record, used by the `list` command and the
//! `/v1/dashboard` endpoint.

use serde::{Deserialize, Serialize};

use super::config::RateLimitConfig;
use super::error::QuotaError;
use super::manager::{AdmissionController, RecoveryStatsSnapshot};
use super::quota::{QuotaPolicy, QuotaRecord};

/// Dashboard data for admin interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardData {
    /// Timestamp of data generation
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Summary statistics
    pub summary: QuotaSummary,

    /// Every stored record, ordered by user id
    pub records: Vec<QuotaRecord>,

    /// Recovery activity in this process
    pub recovery: RecoveryStatsSnapshot,

    /// Current configuration
    pub config: RateLimitConfig,
}

/// Summary of quota state across all users
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaSummary {
    /// Users with a record
    pub total_users: usize,

    /// Users at max quota and not recovering
    pub full_users: usize,

    /// Users with the recovering flag set
    pub recovering_users: usize,

    /// Users with no quota left
    pub depleted_users: usize,

    /// Average remaining quota as a percentage of max
    pub avg_remaining_percent: f64,
}

impl QuotaSummary {
    /// Summarize `records` against `policy`
    pub fn from_records(records: &[QuotaRecord], policy: &QuotaPolicy) -> Self {
        let mut summary = Self {
            total_users: records.len(),
            ..Self::default()
        };

        let mut remaining_percent = 0.0;
        for record in records {
            let (quota, _) = policy.clamp(record.quota);
            if record.recovering {
                summary.recovering_users += 1;
            } else if quota == policy.max_quota {
                summary.full_users += 1;
            }
            if quota == 0 {
                summary.depleted_users += 1;
            }
            remaining_percent += f64::from(quota) / f64::from(policy.max_quota) * 100.0;
        }

        if !records.is_empty() {
            summary.avg_remaining_percent = remaining_percent / records.len() as f64;
        }
        summary
    }
}

/// Dashboard builder for constructing dashboard data
pub struct DashboardBuilder {
    controller: AdmissionController,
}

impl DashboardBuilder {
    /// Create a new dashboard builder
    pub fn new(controller: AdmissionController) -> Self {
        Self { controller }
    }

    /// Build dashboard data
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn build(&self) -> Result<DashboardData, QuotaError> {
        let config = self.controller.config().clone();
        let records = self.controller.records().await?;
        let summary = QuotaSummary::from_records(&records, &config.policy());

        Ok(DashboardData {
            timestamp: chrono::Utc::now(),
            summary,
            records,
            recovery: self.controller.recovery_stats(),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::UserId;
    use chrono::Utc;
    use std::time::Duration;

    fn record(id: &str, quota: i64, recovering: bool) -> QuotaRecord {
        QuotaRecord {
            user_id: UserId::from(id),
            quota,
            recovering,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_counts() {
        let policy = QuotaPolicy::new(4, Duration::from_secs(1));
        let records = vec![
            record("a", 4, false),
            record("b", 2, true),
            record("c", 0, true),
        ];

        let summary = QuotaSummary::from_records(&records, &policy);

        assert_eq!(summary.total_users, 3);
        assert_eq!(summary.full_users, 1);
        assert_eq!(summary.recovering_users, 2);
        assert_eq!(summary.depleted_users, 1);
        assert_eq!(summary.avg_remaining_percent, 50.0);
    }

    #[test]
    fn test_summary_empty() {
        let policy = QuotaPolicy::new(4, Duration::from_secs(1));
        let summary = QuotaSummary::from_records(&[], &policy);
        assert_eq!(summary, QuotaSummary::default());
    }

    #[tokio::test]
    async fn test_dashboard_builder() {
        let controller = AdmissionController::in_memory(RateLimitConfig::new(3, 60));
        controller.try_consume(&UserId::from("user-1")).await.unwrap();

        let dashboard = DashboardBuilder::new(controller).build().await.unwrap();

        assert_eq!(dashboard.summary.total_users, 1);
        assert_eq!(dashboard.summary.recovering_users, 1);
        assert_eq!(dashboard.records[0].quota, 2);
        assert_eq!(dashboard.recovery.chains_started, 1);
        assert!(dashboard.timestamp.timestamp() > 0);
    }

    #[test]
    fn test_quota_summary_serialization() {
        let summary = QuotaSummary {
            total_users: 10,
            full_users: 5,
            recovering_users: 5,
            depleted_users: 2,
            avg_remaining_percent: 45.5,
        };

        let json = serde_json::to_string(&summary).unwrap();
        let parsed: QuotaSummary = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, summary);
    }
}
