//! Rate Limiting and Quota Management Module
//!
//! Per-user admission quota for the transcription provider. Each user starts
//! with `max_quota` admissions; every admitted request spends one, and a
//! background recovery chain adds one back per `recovery_interval` until the
//! user is full again.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Admission Controller                       │
//! │   try_consume(user) ──► per-user lock ──► decrement          │
//! │                                   └──► spawn recovery chain  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐        ┌──────────────────────────┐    │
//! │  │ Recovery chains │ ─────► │ Quota Store              │    │
//! │  │ (one per user)  │        │ (SQLite or in-memory)    │    │
//! │  └─────────────────┘        └──────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per user the state machine is:
//!
//! ```text
//! FULL ──consume──► RECOVERING ──tick──► RECOVERING ──tick (at max)──► FULL
//!                      ▲   │
//!                      └───┘ consume (no new chain)
//! ```

pub mod config;
pub mod dashboard;
pub mod error;
pub mod locks;
pub mod manager;
pub mod quota;
mod recovery;
pub mod sqlite;
pub mod store;

pub use config::RateLimitConfig;
pub use dashboard::DashboardData;
pub use error::{QuotaError, StoreError};
pub use manager::{AdmissionController, AdmissionResult, ReconcileReport, RecoveryStatsSnapshot};
pub use quota::{QuotaPolicy, QuotaRecord, QuotaState, UserId};
pub use sqlite::SqliteQuotaStore;
pub use store::{MemoryQuotaStore, QuotaStore};
