//! Repository: the database security boundary
//!
//! This is the only module that holds the connection pool and issues SQL.
//! Everything else calls through its operations. The statements enforce the
//! write invariants:
//!
//! - every batch update is scoped by primary key;
//! - reaper reset and reaper fail carry disjoint attempt-count predicates;
//! - every row insert binds both the batch id and the tenant (`casino_id`)
//!   taken from the claimed batch row;
//! - only `import_batches` and `import_rows` are touched;
//! - the claim selects `uploaded` batches only, and the worker writes batch
//!   status only as `parsing`, `staging` or `failed` (`uploaded` is the
//!   reaper reset, the one documented exception).
//!
//! All statements use parameter binding. Database errors propagate unwrapped
//! to the caller; recovery across iterations is the reaper's job, not this
//! module's.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, QueryBuilder};
use std::time::Duration;
use uuid::Uuid;

use pim_common::contract::ReportSummary;

use crate::batch::{error_codes, BatchStatus, ClaimedBatch, ProcessedRow};
use crate::config::DatabaseConfig;
use crate::error::WorkerResult;
use crate::pipeline::BatchStore;

/// Counts of batches touched by one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    /// Stale batches returned to `uploaded` for another attempt.
    pub reset: u64,
    /// Stale batches permanently failed with `MAX_ATTEMPTS_EXCEEDED`.
    pub failed: u64,
}

/// Exclusive holder of all database statements.
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    /// Connect a small pool and apply the per-connection statement timeout.
    pub async fn connect(config: &DatabaseConfig) -> WorkerResult<Self> {
        // SET cannot take bind parameters; the value is a validated integer
        // from our own configuration, never external input.
        let timeout_stmt = format!(
            "SET statement_timeout = {}",
            config.statement_timeout().as_millis()
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .after_connect(move |conn, _meta| {
                let stmt = timeout_stmt.clone();
                Box::pin(async move {
                    conn.execute(stmt.as_str()).await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Drain the pool on shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Atomically claim the oldest `uploaded` batch.
    ///
    /// `FOR UPDATE SKIP LOCKED` gives concurrent workers disjoint candidate
    /// sets, so exactly one wins each target row. Returns `None` when no
    /// batch is claimable.
    pub async fn claim_next(&self, worker_id: &str) -> WorkerResult<Option<ClaimedBatch>> {
        let claimed = sqlx::query_as::<_, ClaimedBatch>(
            r#"
            UPDATE import_batches AS b
            SET status = $2,
                claimed_by = $1,
                claimed_at = NOW(),
                heartbeat_at = NOW(),
                attempt_count = b.attempt_count + 1
            WHERE b.id = (
                SELECT id FROM import_batches
                WHERE status = $3
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING b.id, b.casino_id, b.storage_path, b.original_file_name,
                      b.column_mapping, b.attempt_count
            "#,
        )
        .bind(worker_id)
        .bind(BatchStatus::Parsing.as_str())
        .bind(BatchStatus::Uploaded.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed)
    }

    /// Recover stale claims: reset batches with attempts remaining, fail the
    /// rest. The two updates are disjoint by the attempt-count predicate and
    /// each is an idempotent set-based update.
    pub async fn reap_stale(
        &self,
        stale_after: Duration,
        max_attempts: i32,
    ) -> WorkerResult<ReapOutcome> {
        let stale_secs = stale_after.as_secs() as i64;

        let reset = sqlx::query(
            r#"
            UPDATE import_batches
            SET status = $3,
                claimed_by = NULL,
                claimed_at = NULL,
                heartbeat_at = NULL
            WHERE status = $4
              AND heartbeat_at < NOW() - ($1 * INTERVAL '1 second')
              AND attempt_count < $2
            "#,
        )
        .bind(stale_secs)
        .bind(max_attempts)
        .bind(BatchStatus::Uploaded.as_str())
        .bind(BatchStatus::Parsing.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let failed = sqlx::query(
            r#"
            UPDATE import_batches
            SET status = $3,
                last_error_code = $4,
                last_error_at = NOW()
            WHERE status = $5
              AND heartbeat_at < NOW() - ($1 * INTERVAL '1 second')
              AND attempt_count >= $2
            "#,
        )
        .bind(stale_secs)
        .bind(max_attempts)
        .bind(BatchStatus::Failed.as_str())
        .bind(error_codes::MAX_ATTEMPTS_EXCEEDED)
        .bind(BatchStatus::Parsing.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(ReapOutcome { reset, failed })
    }

    /// Refresh the claim heartbeat.
    pub async fn heartbeat(&self, batch_id: Uuid) -> WorkerResult<()> {
        sqlx::query("UPDATE import_batches SET heartbeat_at = NOW() WHERE id = $1")
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record progress; also refreshes the heartbeat.
    pub async fn update_progress(&self, batch_id: Uuid, total_rows: i64) -> WorkerResult<()> {
        sqlx::query(
            "UPDATE import_batches SET total_rows = $2, heartbeat_at = NOW() WHERE id = $1",
        )
        .bind(batch_id)
        .bind(total_rows)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal success: move the batch to `staging` with its report.
    pub async fn complete_batch(
        &self,
        batch_id: Uuid,
        total_rows: i64,
        report: &ReportSummary,
    ) -> WorkerResult<()> {
        sqlx::query(
            r#"
            UPDATE import_batches
            SET status = $4,
                total_rows = $2,
                report_summary = $3,
                heartbeat_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .bind(total_rows)
        .bind(serde_json::to_value(report)?)
        .bind(BatchStatus::Staging.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal failure with an error code the UI can surface.
    pub async fn fail_batch(&self, batch_id: Uuid, error_code: &str) -> WorkerResult<()> {
        sqlx::query(
            r#"
            UPDATE import_batches
            SET status = $3,
                last_error_code = $2,
                last_error_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .bind(error_code)
        .bind(BatchStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Multi-row insert of a processed chunk.
    ///
    /// `batch_id` and `casino_id` come from the claimed batch for every row
    /// (never from the caller's own derivation), and the conflict clause
    /// makes re-inserting a chunk after a reaper reset a no-op per
    /// `(batch_id, row_number)`.
    pub async fn insert_rows(
        &self,
        batch: &ClaimedBatch,
        rows: &[ProcessedRow],
    ) -> WorkerResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::new(
            "INSERT INTO import_rows \
             (batch_id, casino_id, row_number, raw, normalized, status, error_code, error_detail) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(batch.id)
                .push_bind(batch.casino_id)
                .push_bind(row.row_number)
                .push_bind(&row.raw)
                .push_bind(&row.normalized)
                .push_bind(row.status.as_str())
                .push_bind(row.error_code.as_deref())
                .push_bind(row.error_detail.as_deref());
        });
        builder.push(" ON CONFLICT (batch_id, row_number) DO NOTHING");

        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BatchStore for Repository {
    async fn insert_rows(&self, batch: &ClaimedBatch, rows: &[ProcessedRow]) -> WorkerResult<()> {
        Repository::insert_rows(self, batch, rows).await
    }

    async fn update_progress(&self, batch_id: Uuid, total_rows: i64) -> WorkerResult<()> {
        Repository::update_progress(self, batch_id, total_rows).await
    }

    async fn heartbeat(&self, batch_id: Uuid) -> WorkerResult<()> {
        Repository::heartbeat(self, batch_id).await
    }

    async fn complete_batch(
        &self,
        batch_id: Uuid,
        total_rows: i64,
        report: &ReportSummary,
    ) -> WorkerResult<()> {
        Repository::complete_batch(self, batch_id, total_rows, report).await
    }

    async fn fail_batch(&self, batch_id: Uuid, error_code: &str) -> WorkerResult<()> {
        Repository::fail_batch(self, batch_id, error_code).await
    }
}
