//! SQLite-backed `OutboxStore`.
//!
//! Grounded on `fc-outbox/src/sqlite.rs`'s `SqliteOutboxRepository`: plain
//! `sqlx::query` (not the compile-time `query!` macro, since the schema is
//! created by this crate rather than known to `cargo` at build time),
//! millisecond-epoch timestamp columns, and a `parse_row` helper.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use conduit_common::{ConduitError, Result};

use crate::store::{version_conflict, OutboxEntry, OutboxStatus, OutboxStore};

pub struct SqliteOutboxStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteOutboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_table(pool, "outbox_entries")
    }

    pub fn with_table(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<OutboxEntry> {
        let headers_json: String = row.try_get("headers").map_err(sqlx_err)?;
        let headers = serde_json::from_str(&headers_json)
            .map_err(|e| ConduitError::TransportError(format!("corrupt outbox headers: {e}")))?;
        let status_str: String = row.try_get("status").map_err(sqlx_err)?;
        let created_at_ms: i64 = row.try_get("created_at").map_err(sqlx_err)?;
        let next_attempt_ms: i64 = row.try_get("next_attempt_at").map_err(sqlx_err)?;
        let lease_expires_ms: Option<i64> = row.try_get("lease_expires_at").map_err(sqlx_err)?;

        Ok(OutboxEntry {
            id: row.try_get("id").map_err(sqlx_err)?,
            message_type: row.try_get("message_type").map_err(sqlx_err)?,
            payload: row.try_get("payload").map_err(sqlx_err)?,
            headers,
            group_key: row.try_get("group_key").map_err(sqlx_err)?,
            created_at: DateTime::from_timestamp_millis(created_at_ms).unwrap_or_else(Utc::now),
            status: parse_status(&status_str),
            attempts: row.try_get::<i64, _>("attempts").map_err(sqlx_err)? as u32,
            next_attempt_at: DateTime::from_timestamp_millis(next_attempt_ms).unwrap_or_else(Utc::now),
            last_error: row.try_get("last_error").map_err(sqlx_err)?,
            lease_owner: row.try_get("lease_owner").map_err(sqlx_err)?,
            lease_expires_at: lease_expires_ms.and_then(DateTime::from_timestamp_millis),
            version: row.try_get::<i64, _>("version").map_err(sqlx_err)? as u64,
        })
    }
}

fn status_str(status: OutboxStatus) -> &'static str {
    match status {
        OutboxStatus::Pending => "pending",
        OutboxStatus::InFlight => "in_flight",
        OutboxStatus::Published => "published",
        OutboxStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> OutboxStatus {
    match s {
        "in_flight" => OutboxStatus::InFlight,
        "published" => OutboxStatus::Published,
        "failed" => OutboxStatus::Failed,
        _ => OutboxStatus::Pending,
    }
}

fn sqlx_err(e: sqlx::Error) -> ConduitError {
    ConduitError::TransportError(format!("outbox store: {e}"))
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn init_schema(&self) -> Result<()> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                message_type TEXT NOT NULL,
                payload BLOB NOT NULL,
                headers TEXT NOT NULL,
                group_key TEXT,
                created_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at INTEGER NOT NULL,
                last_error TEXT,
                lease_owner TEXT,
                lease_expires_at INTEGER,
                version INTEGER NOT NULL DEFAULT 0
            )",
            self.table
        );
        sqlx::query(&query).execute(&self.pool).await.map_err(sqlx_err)?;
        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_pending ON {0} (status, next_attempt_at)",
            self.table
        );
        sqlx::query(&index).execute(&self.pool).await.map_err(sqlx_err)?;
        Ok(())
    }

    async fn enqueue(&self, entry: OutboxEntry) -> Result<()> {
        let headers_json = serde_json::to_string(&entry.headers)
            .map_err(|e| ConduitError::TransportError(format!("serialize outbox headers: {e}")))?;
        let query = format!(
            "INSERT INTO {} (id, message_type, payload, headers, group_key, created_at, status, attempts, next_attempt_at, last_error, lease_owner, lease_expires_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );
        sqlx::query(&query)
            .bind(&entry.id)
            .bind(&entry.message_type)
            .bind(&entry.payload)
            .bind(headers_json)
            .bind(&entry.group_key)
            .bind(entry.created_at.timestamp_millis())
            .bind(status_str(entry.status))
            .bind(entry.attempts as i64)
            .bind(entry.next_attempt_at.timestamp_millis())
            .bind(&entry.last_error)
            .bind(&entry.lease_owner)
            .bind(entry.lease_expires_at.map(|t| t.timestamp_millis()))
            .bind(entry.version as i64)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn claim_batch(
        &self,
        batch_size: u32,
        lease_owner: &str,
        lease_duration: Duration,
    ) -> Result<Vec<OutboxEntry>> {
        let now = Utc::now();
        let select = format!(
            "SELECT * FROM {} WHERE status = 'pending' AND next_attempt_at <= ? ORDER BY created_at ASC LIMIT ?",
            self.table
        );
        // Over-fetch so group-skip logic still has enough candidates to fill the batch.
        let rows = sqlx::query(&select)
            .bind(now.timestamp_millis())
            .bind((batch_size as i64) * 4)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;

        let mut claimed = Vec::new();
        let mut groups_taken: HashSet<String> = HashSet::new();
        let lease_expires_at = now + chrono::Duration::from_std(lease_duration).unwrap_or_default();

        for row in rows {
            if claimed.len() >= batch_size as usize {
                break;
            }
            let candidate = Self::parse_row(&row)?;
            if let Some(group) = &candidate.group_key {
                if groups_taken.contains(group) {
                    continue;
                }
            }

            let update = format!(
                "UPDATE {} SET status = 'in_flight', lease_owner = ?, lease_expires_at = ?, version = version + 1
                 WHERE id = ? AND status = 'pending' AND version = ?",
                self.table
            );
            let result = sqlx::query(&update)
                .bind(lease_owner)
                .bind(lease_expires_at.timestamp_millis())
                .bind(&candidate.id)
                .bind(candidate.version as i64)
                .execute(&self.pool)
                .await
                .map_err(sqlx_err)?;

            if result.rows_affected() == 1 {
                if let Some(group) = &candidate.group_key {
                    groups_taken.insert(group.clone());
                }
                let mut claimed_entry = candidate;
                claimed_entry.status = OutboxStatus::InFlight;
                claimed_entry.lease_owner = Some(lease_owner.to_string());
                claimed_entry.lease_expires_at = Some(lease_expires_at);
                claimed_entry.version += 1;
                claimed.push(claimed_entry);
            }
        }

        Ok(claimed)
    }

    async fn mark_published(&self, id: &str, expected_version: u64) -> Result<()> {
        let query = format!(
            "UPDATE {} SET status = 'published', lease_owner = NULL, lease_expires_at = NULL, version = version + 1
             WHERE id = ? AND version = ?",
            self.table
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        if result.rows_affected() != 1 {
            return Err(version_conflict(id));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &str,
        expected_version: u64,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = format!(
            "UPDATE {} SET status = 'pending', attempts = attempts + 1, last_error = ?, next_attempt_at = ?,
             lease_owner = NULL, lease_expires_at = NULL, version = version + 1
             WHERE id = ? AND version = ?",
            self.table
        );
        let result = sqlx::query(&query)
            .bind(error)
            .bind(next_attempt_at.timestamp_millis())
            .bind(id)
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        if result.rows_affected() != 1 {
            return Err(version_conflict(id));
        }
        Ok(())
    }

    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = format!(
            "UPDATE {} SET status = 'pending', lease_owner = NULL, lease_expires_at = NULL, version = version + 1
             WHERE status = 'in_flight' AND lease_expires_at IS NOT NULL AND lease_expires_at <= ?",
            self.table
        );
        let result = sqlx::query(&query)
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = format!("DELETE FROM {} WHERE status = 'published' AND created_at < ?", self.table);
        let result = sqlx::query(&query)
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: &str) -> Result<Option<OutboxEntry>> {
        let query = format!("SELECT * FROM {} WHERE id = ?", self.table);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await.map_err(sqlx_err)?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }
}
