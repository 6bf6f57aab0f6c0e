use cachegate_core::{CacheEntry, CoreError, CoreResult, SyncType};
use chrono::Utc;
use serde_json::Value;
use sqlx::{query, Row, SqlitePool};
use std::str::FromStr;

use crate::util::{db_error, format_time, parse_time};

/// Logical size of the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub entries: u64,
    /// Bytes of keys plus cached payload JSON.
    pub total_bytes: u64,
}

impl StoreStats {
    pub fn average_entry_bytes(&self) -> u64 {
        if self.entries == 0 {
            0
        } else {
            self.total_bytes / self.entries
        }
    }
}

/// Repository for cache entry bookkeeping.
///
/// Every state transition is a single conditional statement, so transitions
/// from concurrent callers serialize in SQLite without explicit locking.
#[derive(Clone)]
pub struct EntryRepository {
    pool: SqlitePool,
}

impl EntryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trip a trivial query to prove the store is reachable.
    pub async fn ping(&self) -> CoreResult<()> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Insert or replace an entry as dirty with the given payload.
    pub async fn upsert_dirty(&self, key: &str, data: &Value) -> CoreResult<()> {
        let now = format_time(Utc::now());
        let json = serde_json::to_string(data)?;

        query(
            r#"
            INSERT INTO cache_entries (id, update_time, sync_type, has_data, data, version)
            VALUES (?1, ?2, 'update', 1, ?3, 0)
            ON CONFLICT(id) DO UPDATE SET
                update_time = excluded.update_time,
                sync_type = 'update',
                has_data = 1,
                data = excluded.data,
                version = cache_entries.version + 1
            "#,
        )
        .bind(key)
        .bind(&now)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    /// Fetch an entry regardless of its state.
    pub async fn fetch(&self, key: &str) -> CoreResult<Option<CacheEntry>> {
        let row = query(
            r#"
            SELECT id, update_time, sync_type, has_data, data, version
            FROM cache_entries
            WHERE id = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|row| row_to_entry(&row)).transpose()
    }

    /// Fill a payload-less clean entry with data pulled from the cold tier.
    ///
    /// Returns `false` when the entry changed meanwhile (written, deleted or
    /// already hydrated), in which case nothing is written.
    pub async fn hydrate(&self, key: &str, data: &Value) -> CoreResult<bool> {
        let now = format_time(Utc::now());
        let json = serde_json::to_string(data)?;

        let result = query(
            r#"
            UPDATE cache_entries
            SET update_time = ?2, sync_type = NULL, has_data = 1, data = ?3,
                version = version + 1
            WHERE id = ?1 AND sync_type IS NULL AND has_data = 0
            "#,
        )
        .bind(key)
        .bind(&now)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    /// Store a patched payload if the entry is still at `expected_version`
    /// and not pending delete. Returns `false` on a lost race.
    pub async fn write_patched(
        &self,
        key: &str,
        expected_version: i64,
        data: &Value,
    ) -> CoreResult<bool> {
        let now = format_time(Utc::now());
        let json = serde_json::to_string(data)?;

        let result = query(
            r#"
            UPDATE cache_entries
            SET update_time = ?3, sync_type = 'update', has_data = 1, data = ?4,
                version = version + 1
            WHERE id = ?1 AND version = ?2 AND sync_type IS NOT 'delete'
            "#,
        )
        .bind(key)
        .bind(expected_version)
        .bind(&now)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    /// Soft delete: drop the payload and mark the entry delete-pending.
    /// Returns `false` if the key was absent or already delete-pending.
    pub async fn mark_deleted(&self, key: &str) -> CoreResult<bool> {
        let now = format_time(Utc::now());

        let result = query(
            r#"
            UPDATE cache_entries
            SET update_time = ?2, sync_type = 'delete', has_data = 0, data = NULL,
                version = version + 1
            WHERE id = ?1 AND sync_type IS NOT 'delete'
            "#,
        )
        .bind(key)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    /// Keys with a pending cold-tier action, oldest first.
    pub async fn list_dirty(&self) -> CoreResult<Vec<(String, SyncType)>> {
        let rows = query(
            r#"
            SELECT id, sync_type
            FROM cache_entries
            WHERE sync_type IS NOT NULL
            ORDER BY update_time, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter()
            .map(|row| -> CoreResult<(String, SyncType)> {
                let id: String = row.try_get("id").map_err(db_error)?;
                let sync_type: String = row.try_get("sync_type").map_err(db_error)?;
                Ok((id, SyncType::from_str(&sync_type)?))
            })
            .collect()
    }

    /// Atomically clear the dirty flag of a pending update and return the
    /// payload to flush. `None` means another actor got there first.
    pub async fn claim_update(&self, key: &str) -> CoreResult<Option<Value>> {
        let row = query(
            r#"
            UPDATE cache_entries
            SET sync_type = NULL, version = version + 1
            WHERE id = ?1 AND sync_type = 'update'
            RETURNING data
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => {
                let data: Option<String> = row.try_get("data").map_err(db_error)?;
                let data = data.ok_or_else(|| {
                    CoreError::internal(format!("pending update `{}` has no payload", key))
                })?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    /// Put a claimed payload back as a pending update after a failed flush.
    /// A newer write or delete that landed since the claim wins.
    pub async fn restore_update(&self, key: &str, data: &Value) -> CoreResult<bool> {
        let json = serde_json::to_string(data)?;

        let result = query(
            r#"
            UPDATE cache_entries
            SET sync_type = 'update', has_data = 1, data = ?2, version = version + 1
            WHERE id = ?1 AND sync_type IS NULL
            "#,
        )
        .bind(key)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    /// Remove the record of a delete-pending entry.
    pub async fn purge_deleted(&self, key: &str) -> CoreResult<bool> {
        let result = query(
            r#"
            DELETE FROM cache_entries
            WHERE id = ?1 AND sync_type = 'delete'
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn stats(&self) -> CoreResult<StoreStats> {
        let row = query(
            r#"
            SELECT
                COUNT(*) AS entries,
                COALESCE(SUM(LENGTH(CAST(id AS BLOB))
                    + COALESCE(LENGTH(CAST(data AS BLOB)), 0)), 0) AS total_bytes
            FROM cache_entries
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        let entries: i64 = row.try_get("entries").map_err(db_error)?;
        let total_bytes: i64 = row.try_get("total_bytes").map_err(db_error)?;

        Ok(StoreStats {
            entries: entries.max(0) as u64,
            total_bytes: total_bytes.max(0) as u64,
        })
    }

    /// Strip the payload of up to `limit` clean entries, oldest first.
    /// Dirty entries are never touched.
    pub async fn strip_oldest_clean(&self, limit: u64) -> CoreResult<u64> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let result = query(
            r#"
            UPDATE cache_entries
            SET has_data = 0, data = NULL, version = version + 1
            WHERE id IN (
                SELECT id FROM cache_entries
                WHERE sync_type IS NULL AND has_data = 1
                ORDER BY update_time, id
                LIMIT ?1
            )
            AND sync_type IS NULL
            "#,
        )
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    /// Every key, including delete-pending ones.
    pub async fn list_ids(&self) -> CoreResult<Vec<String>> {
        self.ids("SELECT id FROM cache_entries ORDER BY id").await
    }

    /// Keys visible to reads.
    pub async fn list_live_ids(&self) -> CoreResult<Vec<String>> {
        self.ids(
            r#"
            SELECT id FROM cache_entries
            WHERE sync_type IS NOT 'delete'
            ORDER BY id
            "#,
        )
        .await
    }

    async fn ids(&self, sql: &'static str) -> CoreResult<Vec<String>> {
        let rows = query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("id").map_err(db_error))
            .collect()
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> CoreResult<CacheEntry> {
    let update_time: String = row.try_get("update_time").map_err(db_error)?;
    let sync_type: Option<String> = row.try_get("sync_type").map_err(db_error)?;
    let data: Option<String> = row.try_get("data").map_err(db_error)?;

    Ok(CacheEntry {
        id: row.try_get("id").map_err(db_error)?,
        update_time: parse_time(&update_time)?,
        sync_type: sync_type.as_deref().map(SyncType::from_str).transpose()?,
        has_data: row.try_get::<i64, _>("has_data").map_err(db_error)? != 0,
        data: data.as_deref().map(serde_json::from_str).transpose()?,
        version: row.try_get("version").map_err(db_error)?,
    })
}
