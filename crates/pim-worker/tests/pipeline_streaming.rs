//! Streaming CSV scenarios driven through the real csv-async reader and the
//! row-processing stages. No database: the statements themselves are plain
//! parameter-bound SQL exercised against live PostgreSQL in deployment.

use csv_async::StringRecord;
use futures::StreamExt;

use pim_common::normalize::normalize_headers;
use pim_worker::batch::{ColumnMapping, ProcessedRow, RowStatus};
use pim_worker::pipeline::{process_record, FieldPlan};

/// Read a CSV byte slice the way the pipeline does: first record is the
/// header row, every following record is a data row.
async fn read_csv(data: &[u8]) -> (Vec<String>, Vec<StringRecord>) {
    let mut reader = csv_async::AsyncReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv_async::Trim::All)
        .create_reader(data);
    let mut records = reader.records();

    let header_record = records
        .next()
        .await
        .expect("csv has a header row")
        .expect("header row parses");
    let fields: Vec<&str> = header_record.iter().collect();
    let headers = normalize_headers(&fields);

    let mut rows = Vec::new();
    while let Some(record) = records.next().await {
        rows.push(record.expect("data row parses"));
    }

    (headers, rows)
}

fn mapping(pairs: &[(&str, &str)]) -> ColumnMapping {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn process_csv(data: &[u8], map: &ColumnMapping) -> Vec<ProcessedRow> {
    let (headers, records) = read_csv(data).await;
    let plan = FieldPlan::new(&headers, map);
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            process_record(&plan, Some("players.csv"), &headers, record, (i + 1) as i64)
                .expect("row processes")
        })
        .collect()
}

#[tokio::test]
async fn happy_path_single_valid_row() {
    let csv = b"email,first_name,last_name\nalice@example.com,Alice,Smith\n";
    let map = mapping(&[
        ("email", "email"),
        ("first_name", "first_name"),
        ("last_name", "last_name"),
    ]);

    let rows = process_csv(csv, &map).await;
    assert_eq!(rows.len(), 1);

    let row = &rows[0];
    assert_eq!(row.status, RowStatus::Staged);
    assert_eq!(row.row_number, 1);
    assert_eq!(row.error_code, None);
    assert_eq!(
        row.normalized["identifiers"],
        serde_json::json!({ "email": "alice@example.com" })
    );
    assert_eq!(
        row.normalized["profile"],
        serde_json::json!({ "first_name": "Alice", "last_name": "Smith" })
    );
    assert_eq!(row.normalized["row_ref"]["row_number"], 1);
    assert_eq!(row.normalized["contract_version"], "v1");
}

#[tokio::test]
async fn missing_identifier_yields_error_row() {
    let csv = b"first_name,last_name\nBob,Jones\n";
    let map = mapping(&[("first_name", "first_name"), ("last_name", "last_name")]);

    let rows = process_csv(csv, &map).await;
    assert_eq!(rows.len(), 1);

    let row = &rows[0];
    assert_eq!(row.status, RowStatus::Error);
    assert_eq!(row.error_code.as_deref(), Some("VALIDATION_FAILED"));
    assert!(row
        .error_detail
        .as_deref()
        .unwrap()
        .contains("at least one of email or phone is required"));
}

#[tokio::test]
async fn headers_deduplicate_and_fill_blanks() {
    let csv = "  email ,,Email\na@b.co,x,y\n".as_bytes();
    let (headers, _) = read_csv(csv).await;
    assert_eq!(headers, vec!["email", "_col_2", "Email"]);
}

#[tokio::test]
async fn bom_is_stripped_from_first_header() {
    let csv = "\u{feff}email,name\na@b.co,Ann\n".as_bytes();
    let (headers, _) = read_csv(csv).await;
    assert_eq!(headers, vec!["email", "name"]);
}

#[tokio::test]
async fn quoted_header_newline_collapses_to_space() {
    let csv = b"\"first\nname\",email\nAnn,a@b.co\n";
    let (headers, _) = read_csv(csv).await;
    assert_eq!(headers, vec!["first name", "email"]);
}

#[tokio::test]
async fn empty_lines_are_skipped() {
    let csv = b"email,first_name,last_name\n\n\na@b.co,Ann,Lee\n\n";
    let (_, records) = read_csv(csv).await;
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn fields_are_trimmed_by_the_parser() {
    let csv = b"email,first_name,last_name\n  a@b.co , Ann ,Lee\n";
    let map = mapping(&[
        ("email", "email"),
        ("first_name", "first_name"),
        ("last_name", "last_name"),
    ]);

    let rows = process_csv(csv, &map).await;
    assert_eq!(rows[0].status, RowStatus::Staged);
    assert_eq!(rows[0].normalized["identifiers"]["email"], "a@b.co");
    assert_eq!(rows[0].raw["first_name"], "Ann");
}

#[tokio::test]
async fn variable_field_counts_are_tolerated() {
    let csv = b"email,first_name,last_name\na@b.co,Ann\nb@c.co,Bo,Lee,extra\n";
    let map = mapping(&[
        ("email", "email"),
        ("first_name", "first_name"),
        ("last_name", "last_name"),
    ]);

    let rows = process_csv(csv, &map).await;
    assert_eq!(rows.len(), 2);

    // Short row: last_name absent, so validation fails the row
    assert_eq!(rows[0].status, RowStatus::Error);
    assert!(rows[0]
        .error_detail
        .as_deref()
        .unwrap()
        .contains("missing last_name"));

    // Long row: the extra field is discarded
    assert_eq!(rows[1].status, RowStatus::Staged);
    assert_eq!(rows[1].raw.as_object().unwrap().len(), 3);
}

#[tokio::test]
async fn crlf_line_endings_parse() {
    let csv = b"email,first_name,last_name\r\na@b.co,Ann,Lee\r\n";
    let map = mapping(&[
        ("email", "email"),
        ("first_name", "first_name"),
        ("last_name", "last_name"),
    ]);

    let rows = process_csv(csv, &map).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, RowStatus::Staged);
}

#[tokio::test]
async fn row_numbers_are_one_indexed_and_sequential() {
    let csv = b"email,first_name,last_name\na@b.co,A,L\nb@c.co,B,M\nc@d.co,C,N\n";
    let map = mapping(&[
        ("email", "email"),
        ("first_name", "first_name"),
        ("last_name", "last_name"),
    ]);

    let rows = process_csv(csv, &map).await;
    let numbers: Vec<i64> = rows.iter().map(|r| r.row_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(
            row.normalized["row_ref"]["row_number"],
            serde_json::json!(i as i64 + 1)
        );
    }
}

#[tokio::test]
async fn mixed_valid_and_invalid_rows() {
    let csv = b"email,phone,first_name,last_name\n\
        alice@example.com,,Alice,Smith\n\
        not-an-email,,Bob,Jones\n\
        ,5551234567,Cara,Diaz\n";
    let map = mapping(&[
        ("email", "email"),
        ("phone", "phone"),
        ("first_name", "first_name"),
        ("last_name", "last_name"),
    ]);

    let rows = process_csv(csv, &map).await;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].status, RowStatus::Staged);
    assert_eq!(rows[1].status, RowStatus::Error);
    assert_eq!(rows[1].error_detail.as_deref(), Some("invalid email format"));
    assert_eq!(rows[2].status, RowStatus::Staged);
}
