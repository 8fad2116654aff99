//! Admission Controller
//!
//! Single entry point gating use of the transcription provider. Implements the
//! decrement half of the quota state machine and owns the recovery chains that
//! implement the increment half (see [`super::recovery`]).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::config::RateLimitConfig;
use super::dashboard::{DashboardBuilder, DashboardData};
use super::error::{QuotaError, StoreError};
use super::locks::UserLocks;
use super::quota::{QuotaPolicy, QuotaRecord, UserId};
use super::recovery;
use super::store::{MemoryQuotaStore, QuotaStore};
use crate::metrics;

/// Result of an admission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResult {
    /// Whether the request is allowed
    pub allowed: bool,

    /// Remaining quota after this request
    pub remaining: u32,

    /// Whether this request started a recovery chain
    pub recovery_started: bool,
}

impl AdmissionResult {
    /// Create an admitted result
    pub fn allowed(remaining: u32, recovery_started: bool) -> Self {
        Self {
            allowed: true,
            remaining,
            recovery_started,
        }
    }

    /// Create a denied result
    pub fn denied() -> Self {
        Self {
            allowed: false,
            remaining: 0,
            recovery_started: false,
        }
    }

    /// Result returned while rate limiting is disabled.
    ///
    /// Nothing is consumed, so the user is reported as full.
    pub fn bypassed(max_quota: u32) -> Self {
        Self::allowed(max_quota, false)
    }
}

/// What the decrement step did under the user's lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consumption {
    Denied,
    Consumed { remaining: u32, recovery_started: bool },
}

/// Repairs applied to one record during reconciliation
#[derive(Debug, Default)]
struct Repair {
    clamped: bool,
    restarted: bool,
    flag_cleared: bool,
}

/// Outcome of startup reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Records inspected
    pub records_scanned: usize,

    /// Users below max that got a fresh recovery chain
    pub chains_restarted: usize,

    /// Stale `recovering` flags cleared on users already at max
    pub flags_cleared: usize,

    /// Out-of-range quotas clamped back into bounds
    pub quotas_clamped: usize,
}

/// Recovery chain counters
#[derive(Debug, Default)]
pub(crate) struct RecoveryStats {
    pub(crate) chains_started: AtomicU64,
    pub(crate) chains_finished: AtomicU64,
    pub(crate) ticks: AtomicU64,
    pub(crate) tick_failures: AtomicU64,
}

/// Point-in-time view of recovery activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStatsSnapshot {
    /// Chains started since the controller was created
    pub chains_started: u64,

    /// Chains that terminated (completed or stopped by shutdown)
    pub chains_finished: u64,

    /// Quota increments applied
    pub ticks: u64,

    /// Ticks that failed and were retried
    pub tick_failures: u64,

    /// Chains currently running
    pub active_chains: usize,
}

/// State shared between the controller handle and its recovery chains
pub(crate) struct ControllerInner {
    pub(crate) config: RateLimitConfig,
    pub(crate) policy: QuotaPolicy,
    pub(crate) store: Arc<dyn QuotaStore>,
    pub(crate) locks: UserLocks,
    pub(crate) stats: RecoveryStats,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    active: Mutex<HashSet<UserId>>,
    chains: Mutex<JoinSet<()>>,
}

impl ControllerInner {
    /// Clamp a stored quota, logging when it was out of bounds
    pub(crate) fn normalize(&self, user_id: &UserId, raw: i64) -> (u32, bool) {
        let (quota, clamped) = self.policy.clamp(raw);
        if clamped {
            warn!(
                user = %user_id,
                stored = raw,
                clamped = quota,
                max_quota = self.policy.max_quota,
                "Stored quota out of range, clamping"
            );
        }
        (quota, clamped)
    }

    /// Register a chain for `user_id`. Returns false if one is already running.
    pub(crate) fn claim_chain(&self, user_id: &UserId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id.clone())
    }

    /// Drop the chain registration for `user_id`
    pub(crate) fn release_chain(&self, user_id: &UserId) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id);
        self.stats.chains_finished.fetch_add(1, Ordering::SeqCst);
        metrics::ACTIVE_RECOVERY_CHAINS.dec();
    }

    pub(crate) fn has_chain(&self, user_id: &UserId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(user_id)
    }

    fn active_chains(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Track a spawned chain task, reaping finished ones
    pub(crate) fn track<F>(&self, chain: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut chains = self.chains.lock().unwrap_or_else(PoisonError::into_inner);
        while chains.try_join_next().is_some() {}
        chains.spawn(chain);
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run a store operation on the blocking pool
    pub(crate) async fn with_store<T, F>(self: &Arc<Self>, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Arc<ControllerInner>) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }

    /// Run a store operation on the blocking pool while holding `user_id`'s lock.
    ///
    /// The guard moves into the blocking task and is released only when the
    /// operation returns, even if the awaiting future is dropped first.
    pub(crate) async fn with_user_locked<T, F>(
        self: &Arc<Self>,
        user_id: &UserId,
        op: F,
    ) -> Result<T, StoreError>
    where
        F: FnOnce(&Arc<ControllerInner>) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.locks.lock(user_id).await;
        self.with_store(move |inner| {
            let _guard = guard;
            op(inner)
        })
        .await
    }

    /// Decrement step. Caller holds the user's lock.
    fn consume(self: &Arc<Self>, user_id: &UserId) -> Result<Consumption, StoreError> {
        let max_quota = self.policy.max_quota;

        self.store.ensure(user_id, max_quota)?;
        let state = self.store.get(user_id)?;
        let (quota, _) = self.normalize(user_id, state.quota);

        if quota == 0 {
            info!(user = %user_id, "Quota exhausted, request denied");
            return Ok(Consumption::Denied);
        }

        let remaining = quota - 1;
        let start_recovery = remaining < max_quota && !state.recovering;
        self.store
            .set_state(user_id, remaining, state.recovering || start_recovery)?;
        info!(user = %user_id, remaining, "Quota consumed");

        let recovery_started = if start_recovery {
            recovery::spawn_chain(self, user_id.clone())
        } else {
            if remaining < max_quota {
                debug!(user = %user_id, "Recovery already in progress, not starting another chain");
            }
            false
        };

        Ok(Consumption::Consumed {
            remaining,
            recovery_started,
        })
    }

    /// Reconcile one record. Caller holds the user's lock.
    fn repair(self: &Arc<Self>, user_id: &UserId) -> Result<Repair, StoreError> {
        let mut repair = Repair::default();
        if self.has_chain(user_id) {
            return Ok(repair);
        }

        let state = self.store.get(user_id)?;
        let (quota, clamped) = self.normalize(user_id, state.quota);
        repair.clamped = clamped;

        if quota < self.policy.max_quota {
            self.store.set_state(user_id, quota, true)?;
            repair.restarted = recovery::spawn_chain(self, user_id.clone());
        } else if state.recovering || clamped {
            self.store.set_state(user_id, quota, false)?;
            repair.flag_cleared = state.recovering;
        }
        Ok(repair)
    }
}

/// Per-user admission controller.
///
/// Cloning is cheap; clones share the store, locks and recovery chains.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("config", &self.inner.config)
            .field("known_users", &self.inner.locks.len())
            .field("active_chains", &self.inner.active_chains())
            .finish()
    }
}

impl AdmissionController {
    /// Create a controller over `store`
    pub fn new(config: RateLimitConfig, store: Arc<dyn QuotaStore>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let policy = config.policy();
        Self {
            inner: Arc::new(ControllerInner {
                config,
                policy,
                store,
                locks: UserLocks::new(),
                stats: RecoveryStats::default(),
                shutdown_tx,
                active: Mutex::new(HashSet::new()),
                chains: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Create a controller over a fresh in-memory store
    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(config, Arc::new(MemoryQuotaStore::new()))
    }

    /// Create a controller that admits everything
    pub fn disabled() -> Self {
        Self::in_memory(RateLimitConfig::disabled())
    }

    /// Active configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.inner.config
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn QuotaStore> {
        &self.inner.store
    }

    /// Try to consume one unit of quota for `user_id`.
    ///
    /// Returns `Ok(false)` when the user has no quota left.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; the caller must treat the request
    /// as not admitted.
    pub async fn try_consume(&self, user_id: &UserId) -> Result<bool, QuotaError> {
        Ok(self.check(user_id).await?.allowed)
    }

    /// Admission check with details about the decision.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the controller was shut down.
    pub async fn check(&self, user_id: &UserId) -> Result<AdmissionResult, QuotaError> {
        if !self.inner.config.enabled {
            metrics::ADMISSIONS_TOTAL
                .with_label_values(&["bypassed"])
                .inc();
            return Ok(AdmissionResult::bypassed(self.inner.policy.max_quota));
        }
        if self.inner.is_shut_down() {
            return Err(QuotaError::ShutDown);
        }

        let user = user_id.clone();
        let consumed = self
            .inner
            .with_user_locked(user_id, move |inner| inner.consume(&user))
            .await;
        match consumed {
            Ok(Consumption::Denied) => {
                metrics::ADMISSIONS_TOTAL.with_label_values(&["denied"]).inc();
                Ok(AdmissionResult::denied())
            }
            Ok(Consumption::Consumed {
                remaining,
                recovery_started,
            }) => {
                metrics::ADMISSIONS_TOTAL.with_label_values(&["admitted"]).inc();
                Ok(AdmissionResult::allowed(remaining, recovery_started))
            }
            Err(e) => {
                metrics::STORE_ERRORS_TOTAL.inc();
                metrics::ADMISSIONS_TOTAL.with_label_values(&["error"]).inc();
                error!(user = %user_id, "Admission check failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Stored record for `user_id`, without creating one
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn status(&self, user_id: &UserId) -> Result<Option<QuotaRecord>, QuotaError> {
        let user = user_id.clone();
        Ok(self
            .inner
            .with_store(move |inner| inner.store.record(&user))
            .await?)
    }

    /// All stored records
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn records(&self) -> Result<Vec<QuotaRecord>, QuotaError> {
        Ok(self.inner.with_store(|inner| inner.store.records()).await?)
    }

    /// Restore recovery for records left behind by a previous process.
    ///
    /// Every user below max gets a chain (unless one is already running here),
    /// stale `recovering` flags on full users are cleared, and out-of-range
    /// quotas are clamped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; records processed before the
    /// failure keep their repairs.
    pub async fn reconcile(&self) -> Result<ReconcileReport, QuotaError> {
        let mut report = ReconcileReport::default();
        if !self.inner.config.enabled {
            return Ok(report);
        }
        if self.inner.is_shut_down() {
            return Err(QuotaError::ShutDown);
        }

        let records = self.inner.with_store(|inner| inner.store.records()).await?;
        for record in records {
            report.records_scanned += 1;
            let user_id = record.user_id;

            let user = user_id.clone();
            let repair = self
                .inner
                .with_user_locked(&user_id, move |inner| inner.repair(&user))
                .await?;
            report.quotas_clamped += usize::from(repair.clamped);
            report.chains_restarted += usize::from(repair.restarted);
            report.flags_cleared += usize::from(repair.flag_cleared);
        }

        info!(
            scanned = report.records_scanned,
            restarted = report.chains_restarted,
            cleared = report.flags_cleared,
            clamped = report.quotas_clamped,
            "Quota store reconciled"
        );
        Ok(report)
    }

    /// Aggregate view of every stored record
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn dashboard(&self) -> Result<DashboardData, QuotaError> {
        DashboardBuilder::new(self.clone()).build().await
    }

    /// Recovery activity counters
    pub fn recovery_stats(&self) -> RecoveryStatsSnapshot {
        let stats = &self.inner.stats;
        RecoveryStatsSnapshot {
            chains_started: stats.chains_started.load(Ordering::SeqCst),
            chains_finished: stats.chains_finished.load(Ordering::SeqCst),
            ticks: stats.ticks.load(Ordering::SeqCst),
            tick_failures: stats.tick_failures.load(Ordering::SeqCst),
            active_chains: self.inner.active_chains(),
        }
    }

    /// Whether a recovery chain is running for `user_id` in this process
    pub fn is_recovering(&self, user_id: &UserId) -> bool {
        self.inner.has_chain(user_id)
    }

    /// Stop all recovery chains at their next wait and wait for them to exit.
    ///
    /// Persisted `recovering` flags are left as they are; [`Self::reconcile`]
    /// picks them up on the next start. Further admission checks fail with
    /// [`QuotaError::ShutDown`].
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let mut chains = {
            let mut guard = self.inner.chains.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        while chains.join_next().await.is_some() {}
        info!("Admission controller shut down");
    }
}
