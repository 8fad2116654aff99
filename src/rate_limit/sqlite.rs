//! `SQLite`-backed quota store.
//!
//! One row per user in `user_quotas`. Every statement runs in autocommit mode,
//! so a mutation is durable once the call returns.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use super::error::{StoreError, StoreResult};
use super::quota::{QuotaRecord, QuotaState, UserId};
use super::store::QuotaStore;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS user_quotas (
    user_id    TEXT PRIMARY KEY NOT NULL,
    quota      INTEGER NOT NULL,
    recovering INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
";

/// Durable quota store
pub struct SqliteQuotaStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteQuotaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteQuotaStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteQuotaStore {
    /// Open or create a store at `path`.
    ///
    /// Parent directories are created when missing. WAL journaling is enabled
    /// for file-backed databases.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!("Opened quota store at {:?} (journal_mode={})", path, mode);

        Self::initialize(conn, Some(path.to_path_buf()))
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> StoreResult<Self> {
        Self::initialize(Connection::open_in_memory()?, None)
    }

    fn initialize(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file path, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    fn update(&self, user_id: &UserId, sql: &str, value: &dyn rusqlite::ToSql) -> StoreResult<()> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(sql, params![value, Utc::now(), user_id.as_str()])?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(user_id.clone()));
        }
        Ok(())
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<QuotaRecord> {
        let user_id: String = row.get(0)?;
        let updated_at: DateTime<Utc> = row.get(3)?;
        Ok(QuotaRecord {
            user_id: UserId::new(user_id),
            quota: row.get(1)?,
            recovering: row.get(2)?,
            updated_at,
        })
    }
}

impl QuotaStore for SqliteQuotaStore {
    fn ensure(&self, user_id: &UserId, default_quota: u32) -> StoreResult<()> {
        let inserted = self.with_conn(|conn| {
            Ok(conn.execute(
                "INSERT OR IGNORE INTO user_quotas (user_id, quota, recovering, updated_at)
                 VALUES (?1, ?2, 0, ?3)",
                params![user_id.as_str(), default_quota, Utc::now()],
            )?)
        })?;
        if inserted > 0 {
            tracing::info!(user = %user_id, quota = default_quota, "Initialized quota record");
        }
        Ok(())
    }

    fn get(&self, user_id: &UserId) -> StoreResult<QuotaState> {
        let state = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT quota, recovering FROM user_quotas WHERE user_id = ?1",
                    params![user_id.as_str()],
                    |row| {
                        Ok(QuotaState {
                            quota: row.get(0)?,
                            recovering: row.get(1)?,
                        })
                    },
                )
                .optional()?)
        })?;
        state.ok_or_else(|| StoreError::NotFound(user_id.clone()))
    }

    fn set_quota(&self, user_id: &UserId, quota: u32) -> StoreResult<()> {
        self.update(
            user_id,
            "UPDATE user_quotas SET quota = ?1, updated_at = ?2 WHERE user_id = ?3",
            &quota,
        )
    }

    fn set_recovering(&self, user_id: &UserId, recovering: bool) -> StoreResult<()> {
        self.update(
            user_id,
            "UPDATE user_quotas SET recovering = ?1, updated_at = ?2 WHERE user_id = ?3",
            &recovering,
        )
    }

    fn set_state(&self, user_id: &UserId, quota: u32, recovering: bool) -> StoreResult<()> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE user_quotas SET quota = ?1, recovering = ?2, updated_at = ?3
                 WHERE user_id = ?4",
                params![quota, recovering, Utc::now(), user_id.as_str()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(user_id.clone()));
        }
        Ok(())
    }

    fn record(&self, user_id: &UserId) -> StoreResult<Option<QuotaRecord>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT user_id, quota, recovering, updated_at
                     FROM user_quotas WHERE user_id = ?1",
                    params![user_id.as_str()],
                    Self::row_to_record,
                )
                .optional()?)
        })
    }

    fn records(&self) -> StoreResult<Vec<QuotaRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, quota, recovering, updated_at
                 FROM user_quotas ORDER BY user_id",
            )?;
            let rows = stmt.query_map([], Self::row_to_record)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}
