//! SQLite-backed `InboxStore`.
//!
//! Grounded on `fc-outbox/src/sqlite.rs`'s plain-`sqlx::query` style. The
//! claim itself is a single `INSERT ... ON CONFLICT DO UPDATE ... WHERE ...
//! RETURNING` statement so the lease check and claim happen atomically
//! without an explicit transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use conduit_common::{ConduitError, Result};

use crate::store::{version_conflict, BeginOutcome, InboxEntry, InboxStatus, InboxStore};

pub struct SqliteInboxStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteInboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_table(pool, "inbox_entries")
    }

    pub fn with_table(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<InboxEntry> {
        let status_str: String = row.try_get("status").map_err(sqlx_err)?;
        let started_ms: i64 = row.try_get("processing_started_at").map_err(sqlx_err)?;
        let processed_ms: Option<i64> = row.try_get("processed_at").map_err(sqlx_err)?;

        Ok(InboxEntry {
            consumer_name: row.try_get("consumer_name").map_err(sqlx_err)?,
            message_id: row.try_get("message_id").map_err(sqlx_err)?,
            status: parse_status(&status_str),
            processing_started_at: DateTime::from_timestamp_millis(started_ms).unwrap_or_else(Utc::now),
            processed_at: processed_ms.and_then(DateTime::from_timestamp_millis),
            attempts: row.try_get::<i64, _>("attempts").map_err(sqlx_err)? as u32,
            last_error: row.try_get("last_error").map_err(sqlx_err)?,
            version: row.try_get::<i64, _>("version").map_err(sqlx_err)? as u64,
        })
    }
}

fn parse_status(s: &str) -> InboxStatus {
    match s {
        "processed" => InboxStatus::Processed,
        "failed" => InboxStatus::Failed,
        _ => InboxStatus::Processing,
    }
}

fn sqlx_err(e: sqlx::Error) -> ConduitError {
    ConduitError::TransportError(format!("inbox store: {e}"))
}

#[async_trait]
impl InboxStore for SqliteInboxStore {
    async fn init_schema(&self) -> Result<()> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                consumer_name TEXT NOT NULL,
                message_id TEXT NOT NULL,
                status TEXT NOT NULL,
                processing_started_at INTEGER NOT NULL,
                processed_at INTEGER,
                attempts INTEGER NOT NULL DEFAULT 1,
                last_error TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (consumer_name, message_id)
            )",
            self.table
        );
        sqlx::query(&query).execute(&self.pool).await.map_err(sqlx_err)?;
        Ok(())
    }

    async fn try_begin(
        &self,
        consumer_name: &str,
        message_id: &str,
        lease_duration: Duration,
    ) -> Result<BeginOutcome> {
        let now = Utc::now();
        let lease_cutoff = now - chrono::Duration::from_std(lease_duration).unwrap_or_default();

        let upsert = format!(
            "INSERT INTO {t} (consumer_name, message_id, status, processing_started_at, processed_at, attempts, last_error, version)
             VALUES (?, ?, 'processing', ?, NULL, 1, NULL, 0)
             ON CONFLICT(consumer_name, message_id) DO UPDATE SET
                status = 'processing',
                processing_started_at = excluded.processing_started_at,
                attempts = {t}.attempts + 1,
                last_error = NULL,
                version = {t}.version + 1
             WHERE {t}.status = 'failed'
                OR ({t}.status = 'processing' AND {t}.processing_started_at <= ?)
             RETURNING *",
            t = self.table
        );

        let row = sqlx::query(&upsert)
            .bind(consumer_name)
            .bind(message_id)
            .bind(now.timestamp_millis())
            .bind(lease_cutoff.timestamp_millis())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;

        if let Some(row) = row {
            return Ok(BeginOutcome::Started(Self::parse_row(&row)?));
        }

        let select = format!("SELECT * FROM {} WHERE consumer_name = ? AND message_id = ?", self.table);
        let existing = sqlx::query(&select)
            .bind(consumer_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_err)?;
        let entry = Self::parse_row(&existing)?;
        match entry.status {
            InboxStatus::Processed => Ok(BeginOutcome::AlreadyProcessed),
            _ => Ok(BeginOutcome::InFlight),
        }
    }

    async fn mark_processed(&self, consumer_name: &str, message_id: &str, expected_version: u64) -> Result<()> {
        let query = format!(
            "UPDATE {} SET status = 'processed', processed_at = ?, version = version + 1
             WHERE consumer_name = ? AND message_id = ? AND version = ?",
            self.table
        );
        let result = sqlx::query(&query)
            .bind(Utc::now().timestamp_millis())
            .bind(consumer_name)
            .bind(message_id)
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        if result.rows_affected() != 1 {
            return Err(version_conflict(consumer_name, message_id));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        consumer_name: &str,
        message_id: &str,
        expected_version: u64,
        error: String,
    ) -> Result<()> {
        let query = format!(
            "UPDATE {} SET status = 'failed', last_error = ?, version = version + 1
             WHERE consumer_name = ? AND message_id = ? AND version = ?",
            self.table
        );
        let result = sqlx::query(&query)
            .bind(error)
            .bind(consumer_name)
            .bind(message_id)
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        if result.rows_affected() != 1 {
            return Err(version_conflict(consumer_name, message_id));
        }
        Ok(())
    }

    async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = format!(
            "DELETE FROM {} WHERE status = 'processed' AND processed_at IS NOT NULL AND processed_at < ?",
            self.table
        );
        let result = sqlx::query(&query)
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn get(&self, consumer_name: &str, message_id: &str) -> Result<Option<InboxEntry>> {
        let query = format!("SELECT * FROM {} WHERE consumer_name = ? AND message_id = ?", self.table);
        let row = sqlx::query(&query)
            .bind(consumer_name)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|r| Self::parse_row(&r)).transpose()
    }
}
