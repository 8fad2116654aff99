//! Quota Store
//!
//! Storage seam for per-user quota records, plus an in-memory implementation.
//! The durable SQLite implementation lives in [`super::sqlite`].

use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use super::error::{StoreError, StoreResult};
use super::quota::{QuotaRecord, QuotaState, UserId};

/// Storage for quota records.
///
/// Every mutation is committed before the call returns, so a read issued after
/// a write in the same process observes that write. Implementations do not
/// provide read-modify-write atomicity on their own; the admission controller
/// serializes per-user sequences.
pub trait QuotaStore: Send + Sync {
    /// Create a record at `default_quota` with `recovering = false` if the
    /// user has none. No-op otherwise.
    fn ensure(&self, user_id: &UserId, default_quota: u32) -> StoreResult<()>;

    /// Current quota and recovering flag
    fn get(&self, user_id: &UserId) -> StoreResult<QuotaState>;

    /// Persist a new quota value
    fn set_quota(&self, user_id: &UserId, quota: u32) -> StoreResult<()>;

    /// Persist the recovering flag
    fn set_recovering(&self, user_id: &UserId, recovering: bool) -> StoreResult<()>;

    /// Persist quota and flag in one commit
    fn set_state(&self, user_id: &UserId, quota: u32, recovering: bool) -> StoreResult<()>;

    /// Full record for a user, if one exists
    fn record(&self, user_id: &UserId) -> StoreResult<Option<QuotaRecord>>;

    /// All records, ordered by user id
    fn records(&self) -> StoreResult<Vec<QuotaRecord>>;
}

/// Non-durable store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    records: RwLock<HashMap<UserId, QuotaRecord>>,
}

impl MemoryQuotaStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, user_id: &UserId, apply: F) -> StoreResult<()>
    where
        F: FnOnce(&mut QuotaRecord),
    {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let record = records
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.clone()))?;
        apply(record);
        record.updated_at = Utc::now();
        Ok(())
    }
}

impl QuotaStore for MemoryQuotaStore {
    fn ensure(&self, user_id: &UserId, default_quota: u32) -> StoreResult<()> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        records
            .entry(user_id.clone())
            .or_insert_with(|| QuotaRecord {
                user_id: user_id.clone(),
                quota: i64::from(default_quota),
                recovering: false,
                updated_at: Utc::now(),
            });
        Ok(())
    }

    fn get(&self, user_id: &UserId) -> StoreResult<QuotaState> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        records
            .get(user_id)
            .map(QuotaRecord::state)
            .ok_or_else(|| StoreError::NotFound(user_id.clone()))
    }

    fn set_quota(&self, user_id: &UserId, quota: u32) -> StoreResult<()> {
        self.update(user_id, |r| r.quota = i64::from(quota))
    }

    fn set_recovering(&self, user_id: &UserId, recovering: bool) -> StoreResult<()> {
        self.update(user_id, |r| r.recovering = recovering)
    }

    fn set_state(&self, user_id: &UserId, quota: u32, recovering: bool) -> StoreResult<()> {
        self.update(user_id, |r| {
            r.quota = i64::from(quota);
            r.recovering = recovering;
        })
    }

    fn record(&self, user_id: &UserId) -> StoreResult<Option<QuotaRecord>> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(user_id).cloned())
    }

    fn records(&self) -> StoreResult<Vec<QuotaRecord>> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        let mut all: Vec<QuotaRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_creation() {
        let store = MemoryQuotaStore::new();
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn test_ensure_creates_full_record() {
        let store = MemoryQuotaStore::new();
        let user = UserId::from("user-123");

        store.ensure(&user, 5).unwrap();

        let state = store.get(&user).unwrap();
        assert_eq!(state.quota, 5);
        assert!(!state.recovering);
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let store = MemoryQuotaStore::new();
        let user = UserId::from("user-123");

        store.ensure(&user, 5).unwrap();
        store.set_quota(&user, 2).unwrap();
        store.ensure(&user, 5).unwrap();

        assert_eq!(store.get(&user).unwrap().quota, 2);
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn test_get_missing_user() {
        let store = MemoryQuotaStore::new();
        let err = store.get(&UserId::from("ghost")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_set_state_commits_both_fields() {
        let store = MemoryQuotaStore::new();
        let user = UserId::from("user-1");
        store.ensure(&user, 3).unwrap();

        store.set_state(&user, 1, true).unwrap();

        let state = store.get(&user).unwrap();
        assert_eq!(state, QuotaState { quota: 1, recovering: true });
    }

    #[test]
    fn test_set_recovering_on_missing_user() {
        let store = MemoryQuotaStore::new();
        assert!(store.set_recovering(&UserId::from("ghost"), true).is_err());
    }

    #[test]
    fn test_records_sorted() {
        let store = MemoryQuotaStore::new();
        store.ensure(&UserId::from("b"), 3).unwrap();
        store.ensure(&UserId::from("a"), 3).unwrap();

        let ids: Vec<String> = store
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.user_id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
