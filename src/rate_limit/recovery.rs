//! Recovery Scheduler
//!
//! One task per recovery chain. The task sleeps for the recovery interval,
//! takes the user's lock, adds one unit of quota and repeats until the user is
//! full again, then clears the `recovering` flag and exits. The exit condition
//! is re-read from the store on every cycle, so admissions made while the chain
//! runs simply extend it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::StoreError;
use super::manager::ControllerInner;
use super::quota::UserId;
use crate::metrics;

/// What a single recovery cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// Quota incremented, more cycles needed
    Incremented(u32),
    /// Chain is done; quota is the final value
    Finished(u32),
}

/// Start a recovery chain for `user_id`.
///
/// The caller holds the user's lock and has already persisted
/// `recovering = true`. A second chain for the same user is never started;
/// returns whether this call started one.
pub(crate) fn spawn_chain(inner: &Arc<ControllerInner>, user_id: UserId) -> bool {
    if !inner.claim_chain(&user_id) {
        warn!(user = %user_id, "Recovery chain already running, not starting another");
        return false;
    }

    inner.stats.chains_started.fetch_add(1, Ordering::SeqCst);
    metrics::RECOVERY_CHAINS_STARTED_TOTAL.inc();
    metrics::ACTIVE_RECOVERY_CHAINS.inc();
    info!(user = %user_id, "Recovery chain started");

    let chain = RecoveryChain {
        inner: Arc::clone(inner),
        shutdown: inner.shutdown_tx.subscribe(),
        user_id,
    };
    inner.track(chain.run());
    true
}

struct RecoveryChain {
    inner: Arc<ControllerInner>,
    shutdown: watch::Receiver<bool>,
    user_id: UserId,
}

impl RecoveryChain {
    async fn run(mut self) {
        let interval = self.inner.policy.recovery_interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.wait_for(|stop| *stop) => {
                    info!(user = %self.user_id, "Recovery chain interrupted by shutdown");
                    self.inner.release_chain(&self.user_id);
                    return;
                }
            }

            let user = self.user_id.clone();
            let outcome = self
                .inner
                .with_user_locked(&self.user_id, move |inner| {
                    let outcome = tick(inner, &user);
                    // deregister while the user's lock is still held
                    if let Ok(TickOutcome::Finished(_)) = outcome {
                        inner.release_chain(&user);
                    }
                    outcome
                })
                .await;
            match outcome {
                Ok(TickOutcome::Incremented(quota)) => {
                    debug!(user = %self.user_id, quota, "Quota recovered by one");
                }
                Ok(TickOutcome::Finished(quota)) => {
                    info!(user = %self.user_id, quota, "Quota fully recovered, chain finished");
                    return;
                }
                Err(e) => {
                    self.inner.stats.tick_failures.fetch_add(1, Ordering::SeqCst);
                    metrics::RECOVERY_TICK_FAILURES_TOTAL.inc();
                    metrics::STORE_ERRORS_TOTAL.inc();
                    warn!(user = %self.user_id, "Recovery tick failed, retrying next interval: {}", e);
                }
            }
        }
    }
}

/// One recovery cycle. Caller holds the user's lock.
fn tick(inner: &ControllerInner, user_id: &UserId) -> Result<TickOutcome, StoreError> {
    let store = &inner.store;
    let max_quota = inner.policy.max_quota;

    let state = store.get(user_id)?;
    let (quota, clamped) = inner.normalize(user_id, state.quota);

    if quota < max_quota && state.recovering {
        let next = quota + 1;
        if next >= max_quota {
            store.set_state(user_id, next, false)?;
        } else {
            store.set_quota(user_id, next)?;
        }
        inner.stats.ticks.fetch_add(1, Ordering::SeqCst);
        metrics::RECOVERY_TICKS_TOTAL.inc();

        return Ok(if next >= max_quota {
            TickOutcome::Finished(next)
        } else {
            TickOutcome::Incremented(next)
        });
    }

    if clamped {
        store.set_state(user_id, quota, false)?;
    } else {
        store.set_recovering(user_id, false)?;
    }
    Ok(TickOutcome::Finished(quota))
}
