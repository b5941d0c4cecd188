//! Crawl, merge and export end to end.
//!
//! Two sources federate one shared status. The shared status has more
//! engagement on the second source, so the aggregated row must carry that
//! copy's counters and list both sources.

use std::sync::atomic::AtomicBool;

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};

use fedicrawl_common::cursor::date_to_snowflake;
use fedicrawl_common::{Cursor, Predicate, RECORD_COLUMNS};
use fedicrawl_engine::testing::{fake_status, MockSource};
use fedicrawl_engine::{
    export_timelines, merge_timeline_files, run_job, CrawlOptions, ExportFormat, ExportOptions,
    JobRequest,
};

const SHARED_URI: &str = "https://origin.example/users/bob/statuses/1";

fn base_id() -> u64 {
    date_to_snowflake(Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap())
}

async fn crawl_two_sources(dir: &std::path::Path) {
    let mut shared_a = fake_status("a.example", base_id() + 1);
    shared_a.0["uri"] = json!(SHARED_URI);
    shared_a.0["favourites_count"] = json!(1);
    let mut shared_b = fake_status("b.example", base_id() + 7);
    shared_b.0["uri"] = json!(SHARED_URI);
    shared_b.0["favourites_count"] = json!(4);
    shared_b.0["reblogs_count"] = json!(2);

    let mock = MockSource::new()
        .on_statuses("a.example", vec![shared_a, fake_status("a.example", base_id() + 2)])
        .on_statuses("b.example", vec![shared_b]);
    let request = JobRequest::builder()
        .predicate(Predicate::hashtag("rust"))
        .sources(vec!["a.example".into(), "b.example".into()])
        .start(Some(Cursor::from_day(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap())))
        .build();

    run_job(dir, request, &mock, &CrawlOptions::default(), &AtomicBool::new(false))
        .await
        .unwrap();
}

fn options(format: ExportFormat, aggregate: bool) -> ExportOptions {
    ExportOptions {
        format,
        aggregate,
        parse_html: true,
        append: false,
    }
}

fn read_rows(path: &std::path::Path) -> (csv::StringRecord, Vec<csv::StringRecord>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader.headers().unwrap().clone();
    let rows = reader.records().map(|r| r.unwrap()).collect();
    (header, rows)
}

fn cell<'a>(header: &csv::StringRecord, row: &'a csv::StringRecord, column: &str) -> &'a str {
    let idx = header.iter().position(|h| h == column).unwrap();
    row.get(idx).unwrap()
}

#[tokio::test]
async fn per_source_csv_has_one_row_per_observation() {
    let dir = tempfile::tempdir().unwrap();
    crawl_two_sources(dir.path()).await;
    let out = dir.path().join("out.csv");

    let timelines = merge_timeline_files(dir.path()).unwrap();
    let stats = export_timelines(&timelines, &out, &options(ExportFormat::Csv, false)).unwrap();

    assert_eq!(stats.rows, 3);
    let (header, rows) = read_rows(&out);
    assert_eq!(header.iter().collect::<Vec<_>>(), RECORD_COLUMNS.to_vec());
    assert_eq!(rows.len(), 3);
    let sources: Vec<&str> = rows.iter().map(|r| cell(&header, r, "source")).collect();
    assert_eq!(sources, vec!["a.example", "a.example", "b.example"]);
    assert_eq!(cell(&header, &rows[1], "content"), format!("status {}\n", base_id() + 2));
}

#[tokio::test]
async fn aggregated_csv_merges_shared_statuses() {
    let dir = tempfile::tempdir().unwrap();
    crawl_two_sources(dir.path()).await;
    let out = dir.path().join("out.csv");

    let timelines = merge_timeline_files(dir.path()).unwrap();
    let stats = export_timelines(&timelines, &out, &options(ExportFormat::Csv, true)).unwrap();

    assert_eq!(stats.rows, 2);
    let (header, rows) = read_rows(&out);
    let shared = rows
        .iter()
        .find(|r| cell(&header, r, "uri") == SHARED_URI)
        .unwrap();
    assert_eq!(cell(&header, shared, "id"), SHARED_URI);
    assert_eq!(cell(&header, shared, "favourites_count"), "4");
    assert_eq!(cell(&header, shared, "reblogs_count"), "2");
    let sources: Vec<String> = serde_json::from_str(cell(&header, shared, "source")).unwrap();
    assert_eq!(sources, vec!["a.example".to_string(), "b.example".to_string()]);
}

#[tokio::test]
async fn append_adds_rows_without_a_second_header() {
    let dir = tempfile::tempdir().unwrap();
    crawl_two_sources(dir.path()).await;
    let out = dir.path().join("out.csv");
    let timelines = merge_timeline_files(dir.path()).unwrap();
    let mut opts = options(ExportFormat::Csv, false);
    opts.append = true;

    export_timelines(&timelines, &out, &opts).unwrap();
    export_timelines(&timelines, &out, &opts).unwrap();

    let (_, rows) = read_rows(&out);
    assert_eq!(rows.len(), 6);
}

#[tokio::test]
async fn aggregated_json_lists_sources_per_status() {
    let dir = tempfile::tempdir().unwrap();
    crawl_two_sources(dir.path()).await;
    let out = dir.path().join("out.json");

    let timelines = merge_timeline_files(dir.path()).unwrap();
    export_timelines(&timelines, &out, &options(ExportFormat::Json, true)).unwrap();

    let doc: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    let items = doc.as_array().unwrap();
    assert_eq!(items.len(), 2);
    let shared = items.iter().find(|i| i["uri"] == SHARED_URI).unwrap();
    assert_eq!(shared["sources"], json!(["a.example", "b.example"]));
}
