//! Batch and row domain types

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

/// Error codes surfaced on batches and rows.
pub mod error_codes {
    /// Reaper exhausted the bounded claim attempts.
    pub const MAX_ATTEMPTS_EXCEEDED: &str = "MAX_ATTEMPTS_EXCEEDED";
    /// The per-batch row cap fired.
    pub const BATCH_ROW_LIMIT: &str = "BATCH_ROW_LIMIT";
    /// One or more row validation rules failed.
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
}

/// Batch lifecycle status
///
/// `uploaded → parsing → {staging | failed}`, with the reaper-only reset
/// `parsing → uploaded` while attempts remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Uploaded,
    Parsing,
    Staging,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BatchStatus::Uploaded => "uploaded",
            BatchStatus::Parsing => "parsing",
            BatchStatus::Staging => "staging",
            BatchStatus::Failed => "failed",
        }
    }
}

/// Row status after processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Staged,
    Error,
}

impl RowStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RowStatus::Staged => "staged",
            RowStatus::Error => "error",
        }
    }
}

/// Column mapping: canonical field name → original CSV header string.
pub type ColumnMapping = HashMap<String, String>;

/// A batch as returned by the atomic claim.
///
/// `casino_id` read from this row is the only permitted source of the tenant
/// identifier for row inserts.
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedBatch {
    pub id: Uuid,
    pub casino_id: Uuid,
    pub storage_path: Option<String>,
    pub original_file_name: Option<String>,
    pub column_mapping: Json<ColumnMapping>,
    pub attempt_count: i32,
}

/// One processed CSV data row, ready for insertion.
#[derive(Debug, Clone)]
pub struct ProcessedRow {
    /// 1-indexed position within the file's data rows.
    pub row_number: i64,
    /// Raw key/value object keyed by normalized header names.
    pub raw: serde_json::Value,
    /// Canonical `v1` payload.
    pub normalized: serde_json::Value,
    pub status: RowStatus,
    pub error_code: Option<String>,
    pub error_detail: Option<String>,
}
