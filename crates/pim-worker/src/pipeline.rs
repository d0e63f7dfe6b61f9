//! Streaming CSV ingestion pipeline
//!
//! Runs one claimed batch: stream → CSV parse → header normalize → row
//! normalize → validate → chunked insert → progress/heartbeat → terminal
//! transition. The file is consumed record by record; backpressure comes
//! from the chunked insert (the parser is only pulled once the database has
//! accepted the previous chunk).

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use csv_async::StringRecord;
use futures::StreamExt;
use regex::Regex;
use tracing::{error, info};
use uuid::Uuid;

use pim_common::contract::{CanonicalPayload, ReportSummary};
use pim_common::normalize::{normalize_headers, normalize_value};

use crate::batch::{error_codes, ClaimedBatch, ColumnMapping, ProcessedRow, RowStatus};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Minimum interval between redundant heartbeat pulses. Progress updates
/// refresh the heartbeat on every flush; this extra pulse only matters when
/// a chunk takes unusually long.
pub const HEARTBEAT_PULSE: std::time::Duration = std::time::Duration::from_secs(30);

#[allow(clippy::expect_used)]
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

#[allow(clippy::expect_used)]
static DOB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid dob regex"));

/// Canonical fields recognized in a batch column mapping.
const FIELD_EMAIL: &str = "email";
const FIELD_PHONE: &str = "phone";
const FIELD_EXTERNAL_ID: &str = "external_id";
const FIELD_FIRST_NAME: &str = "first_name";
const FIELD_LAST_NAME: &str = "last_name";
const FIELD_DOB: &str = "dob";
const FIELD_VENDOR: &str = "vendor";
const FIELD_NOTES: &str = "notes";

/// Resolved column mapping: canonical field → column index.
///
/// Mapping values are original CSV header strings; they are resolved against
/// the normalized header list, since the ingress preview runs the same
/// shared normalizer before building the mapping. A mapping entry whose
/// header is not present in the file resolves to nothing and the field stays
/// absent on every row.
#[derive(Debug, Clone)]
pub struct FieldPlan {
    indices: HashMap<String, usize>,
}

impl FieldPlan {
    pub fn new(headers: &[String], mapping: &ColumnMapping) -> Self {
        let mut indices = HashMap::with_capacity(mapping.len());
        for (field, original_header) in mapping {
            if let Some(idx) = headers.iter().position(|h| h == original_header.trim()) {
                indices.insert(field.clone(), idx);
            }
        }
        Self { indices }
    }

    fn is_mapped(&self, field: &str) -> bool {
        self.indices.contains_key(field)
    }

    fn extract(&self, field: &str, record: &StringRecord) -> Option<String> {
        self.indices
            .get(field)
            .and_then(|&idx| record.get(idx))
            .and_then(normalize_value)
    }
}

/// Normalize one data record into a processed row: raw map, canonical
/// payload, validation outcome.
pub fn process_record(
    plan: &FieldPlan,
    file_name: Option<&str>,
    headers: &[String],
    record: &StringRecord,
    row_number: i64,
) -> WorkerResult<ProcessedRow> {
    // Raw map keyed by normalized headers; fields beyond the header count
    // are discarded.
    let mut raw = serde_json::Map::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        if let Some(value) = record.get(idx) {
            raw.insert(header.clone(), serde_json::Value::String(value.to_string()));
        }
    }

    let mut payload = CanonicalPayload::new(row_number);
    payload.source.vendor = plan.extract(FIELD_VENDOR, record);
    payload.source.file_name = file_name.map(|f| f.to_string());
    payload.identifiers.email = plan.extract(FIELD_EMAIL, record);
    payload.identifiers.phone = plan.extract(FIELD_PHONE, record);
    payload.identifiers.external_id = plan.extract(FIELD_EXTERNAL_ID, record);
    payload.profile.first_name = plan.extract(FIELD_FIRST_NAME, record);
    payload.profile.last_name = plan.extract(FIELD_LAST_NAME, record);
    // dob distinguishes mapped-but-empty (explicit null) from unmapped
    // (omitted from the payload).
    payload.profile.dob = if plan.is_mapped(FIELD_DOB) {
        Some(plan.extract(FIELD_DOB, record))
    } else {
        None
    };
    payload.notes = plan.extract(FIELD_NOTES, record);

    let failures = validate(&payload);
    let normalized = serde_json::to_value(&payload)?;

    Ok(if failures.is_empty() {
        ProcessedRow {
            row_number,
            raw: serde_json::Value::Object(raw),
            normalized,
            status: RowStatus::Staged,
            error_code: None,
            error_detail: None,
        }
    } else {
        ProcessedRow {
            row_number,
            raw: serde_json::Value::Object(raw),
            normalized,
            status: RowStatus::Error,
            error_code: Some(error_codes::VALIDATION_FAILED.to_string()),
            error_detail: Some(failures.join("; ")),
        }
    })
}

/// Run the canonical-row validation rules; returns every failure message.
pub fn validate(payload: &CanonicalPayload) -> Vec<String> {
    let mut failures = Vec::new();

    match &payload.profile.first_name {
        None => failures.push("missing first_name".to_string()),
        Some(name) if name.chars().count() > 100 => {
            failures.push("first_name exceeds 100 characters".to_string())
        },
        _ => {},
    }

    match &payload.profile.last_name {
        None => failures.push("missing last_name".to_string()),
        Some(name) if name.chars().count() > 100 => {
            failures.push("last_name exceeds 100 characters".to_string())
        },
        _ => {},
    }

    if payload.identifiers.email.is_none() && payload.identifiers.phone.is_none() {
        failures.push("at least one of email or phone is required".to_string());
    }

    if let Some(email) = &payload.identifiers.email {
        if !EMAIL_RE.is_match(email) {
            failures.push("invalid email format".to_string());
        }
    }

    if let Some(phone) = &payload.identifiers.phone {
        let len = phone.chars().count();
        if !(7..=20).contains(&len) {
            failures.push("phone must be 7–20 characters".to_string());
        }
    }

    if let Some(Some(dob)) = &payload.profile.dob {
        if !DOB_RE.is_match(dob) {
            failures.push("dob must be YYYY-MM-DD format".to_string());
        }
    }

    failures
}

/// The writes the pipeline needs for one claimed batch.
///
/// Implemented by the repository; the trait is the pipeline's seam so the
/// streaming logic can be exercised without a live database. Every
/// implementation must keep row inserts idempotent per
/// `(batch_id, row_number)`.
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn insert_rows(&self, batch: &ClaimedBatch, rows: &[ProcessedRow]) -> WorkerResult<()>;
    async fn update_progress(&self, batch_id: Uuid, total_rows: i64) -> WorkerResult<()>;
    async fn heartbeat(&self, batch_id: Uuid) -> WorkerResult<()>;
    async fn complete_batch(
        &self,
        batch_id: Uuid,
        total_rows: i64,
        report: &ReportSummary,
    ) -> WorkerResult<()>;
    async fn fail_batch(&self, batch_id: Uuid, error_code: &str) -> WorkerResult<()>;
}

/// Streaming pipeline for one claimed batch.
pub struct IngestionPipeline<'a, S: BatchStore + ?Sized> {
    store: &'a S,
    config: &'a WorkerConfig,
}

impl<'a, S: BatchStore + ?Sized> IngestionPipeline<'a, S> {
    pub fn new(store: &'a S, config: &'a WorkerConfig) -> Self {
        Self { store, config }
    }

    /// Consume the batch's CSV stream to a terminal transition.
    ///
    /// Returns the completion report, or `RowLimitExceeded` after the batch
    /// has already been terminally failed with `BATCH_ROW_LIMIT`. Any other
    /// error leaves the batch in `parsing` for the reaper.
    pub async fn run<R>(&self, batch: &ClaimedBatch, stream: R) -> WorkerResult<ReportSummary>
    where
        R: tokio::io::AsyncRead + Unpin + Send,
    {
        let mut report = ReportSummary::started_now();

        let mut reader = csv_async::AsyncReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_reader(stream);
        let mut records = reader.records();

        let headers = match records.next().await {
            Some(header_record) => {
                let header_record = header_record?;
                let fields: Vec<&str> = header_record.iter().collect();
                normalize_headers(&fields)
            },
            None => {
                // File without a single record: nothing to stage.
                report.complete();
                self.store.complete_batch(batch.id, 0, &report).await?;
                info!(batch_id = %batch.id, "batch contained no records");
                return Ok(report);
            },
        };

        let plan = FieldPlan::new(&headers, &batch.column_mapping.0);
        let file_name = batch.original_file_name.as_deref();

        let mut pending: Vec<ProcessedRow> = Vec::with_capacity(self.config.chunk_size);
        let mut row_number: u64 = 0;
        let mut last_pulse = Instant::now();

        while let Some(record) = records.next().await {
            let record = record?;
            row_number += 1;

            if row_number >= self.config.max_rows {
                error!(
                    batch_id = %batch.id,
                    row_count = row_number,
                    cap = self.config.max_rows,
                    "row cap reached, failing batch"
                );
                self.store
                    .fail_batch(batch.id, error_codes::BATCH_ROW_LIMIT)
                    .await?;
                return Err(WorkerError::RowLimitExceeded {
                    row_count: row_number,
                    cap: self.config.max_rows,
                });
            }

            let processed =
                process_record(&plan, file_name, &headers, &record, row_number as i64)?;
            match processed.status {
                RowStatus::Staged => report.record_valid(),
                RowStatus::Error => report.record_invalid(),
            }
            pending.push(processed);

            if pending.len() >= self.config.chunk_size {
                self.store.insert_rows(batch, &pending).await?;
                pending.clear();
                self.store
                    .update_progress(batch.id, row_number as i64)
                    .await?;

                if last_pulse.elapsed() >= HEARTBEAT_PULSE {
                    self.store.heartbeat(batch.id).await?;
                    last_pulse = Instant::now();
                }
            }
        }

        self.store.insert_rows(batch, &pending).await?;

        report.complete();
        self.store
            .complete_batch(batch.id, row_number as i64, &report)
            .await?;

        info!(
            batch_id = %batch.id,
            row_count = row_number,
            valid_rows = report.valid_rows,
            invalid_rows = report.invalid_rows,
            duration_ms = report.duration_ms,
            "batch staged"
        );

        Ok(report)
    }
}
