//! Canonical row contract and batch report summary
//!
//! The canonical payload is the versioned (`v1`) structured representation
//! of a single imported player, persisted as JSONB on every staged row.
//! Serialization is deterministic: absent optional fields are omitted
//! entirely; `profile.dob` is the one field that may be an explicit `null`
//! (the column was mapped but the cell was empty).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Contract version emitted on every payload.
pub const CONTRACT_VERSION: &str = "v1";

/// Versioned canonical representation of one imported player row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalPayload {
    pub contract_version: String,
    pub source: SourceRef,
    pub row_ref: RowRef,
    pub identifiers: Identifiers,
    pub profile: Profile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Where the row came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Position of the row within the source file (1-indexed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRef {
    pub row_number: i64,
}

/// Player identifiers; validation requires at least one of email or phone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Player profile fields.
///
/// `dob` distinguishes "not mapped" (omitted) from "mapped but empty"
/// (explicit `null`), hence the double `Option`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub dob: Option<Option<String>>,
}

/// Deserialize a present-but-nullable field into `Some(None)` for `null`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::deserialize(deserializer).map(Some)
}

impl CanonicalPayload {
    /// Start a payload for a given row, stamped with the contract version.
    pub fn new(row_number: i64) -> Self {
        Self {
            contract_version: CONTRACT_VERSION.to_string(),
            source: SourceRef::default(),
            row_ref: RowRef { row_number },
            identifiers: Identifiers::default(),
            profile: Profile::default(),
            notes: None,
        }
    }
}

/// Per-batch ingestion report, persisted on the batch at completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_rows: i64,
    pub valid_rows: i64,
    pub invalid_rows: i64,
    /// Always 0: duplicates are silently skipped by the insert conflict
    /// clause and never observed by the pipeline.
    pub duplicate_rows: i64,
    /// Retained for forward compatibility; 0 with the current parser setup.
    pub parse_errors: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
}

impl ReportSummary {
    /// Create an empty report stamped with the start time.
    pub fn started_now() -> Self {
        Self {
            total_rows: 0,
            valid_rows: 0,
            invalid_rows: 0,
            duplicate_rows: 0,
            parse_errors: 0,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
        }
    }

    /// Count one valid (staged) row.
    pub fn record_valid(&mut self) {
        self.valid_rows += 1;
        self.total_rows += 1;
    }

    /// Count one invalid (errored) row.
    pub fn record_invalid(&mut self) {
        self.invalid_rows += 1;
        self.total_rows += 1;
    }

    /// Stamp completion and derive the duration.
    pub fn complete(&mut self) {
        let completed = Utc::now();
        self.duration_ms = (completed - self.started_at).num_milliseconds();
        self.completed_at = Some(completed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_fields_are_omitted() {
        let mut payload = CanonicalPayload::new(1);
        payload.identifiers.email = Some("alice@example.com".to_string());
        payload.profile.first_name = Some("Alice".to_string());
        payload.profile.last_name = Some("Smith".to_string());
        payload.source.file_name = Some("players.csv".to_string());

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "contract_version": "v1",
                "source": { "file_name": "players.csv" },
                "row_ref": { "row_number": 1 },
                "identifiers": { "email": "alice@example.com" },
                "profile": { "first_name": "Alice", "last_name": "Smith" }
            })
        );
    }

    #[test]
    fn test_dob_null_is_preserved() {
        let mut payload = CanonicalPayload::new(3);
        payload.profile.dob = Some(None);

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["profile"], json!({ "dob": null }));

        let back: CanonicalPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.profile.dob, Some(None));
    }

    #[test]
    fn test_dob_omitted_when_unmapped() {
        let payload = CanonicalPayload::new(2);
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value["profile"].get("dob").is_none());

        let back: CanonicalPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.profile.dob, None);
    }

    #[test]
    fn test_dob_value_round_trips() {
        let mut payload = CanonicalPayload::new(4);
        payload.profile.dob = Some(Some("1990-02-28".to_string()));

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["profile"]["dob"], json!("1990-02-28"));
    }

    #[test]
    fn test_report_counters() {
        let mut report = ReportSummary::started_now();
        report.record_valid();
        report.record_valid();
        report.record_invalid();

        assert_eq!(report.total_rows, 3);
        assert_eq!(report.valid_rows, 2);
        assert_eq!(report.invalid_rows, 1);
        assert_eq!(report.duplicate_rows, 0);
        assert_eq!(report.parse_errors, 0);
    }

    #[test]
    fn test_report_complete_stamps_duration() {
        let mut report = ReportSummary::started_now();
        report.complete();

        assert!(report.completed_at.is_some());
        assert!(report.duration_ms >= 0);
    }
}
