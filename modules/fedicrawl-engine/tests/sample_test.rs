//! Date-window sampling against MockSource.
//!
//! Each source serves a few statuses per hour; windows are one day wide and
//! sampling pages backwards from the end of each window.

use std::sync::atomic::AtomicBool;

use chrono::{NaiveDate, TimeZone, Utc};

use fedicrawl_common::cursor::date_to_snowflake;
use fedicrawl_common::RawStatus;
use fedicrawl_engine::aggregate::parse_timelines;
use fedicrawl_engine::testing::{fake_status, MockSource};
use fedicrawl_engine::{run_sample, CrawlOptions, SampleRequest, SourceFailure};

fn at(day: u32, hour: u32) -> u64 {
    date_to_snowflake(Utc.with_ymd_and_hms(2023, 1, day, hour, 0, 0).unwrap())
}

fn statuses(source: &str, day: u32, hours: std::ops::Range<u32>) -> Vec<RawStatus> {
    hours.map(|h| fake_status(source, at(day, h))).collect()
}

fn request(sources: &[&str], chunk_size: usize) -> SampleRequest {
    SampleRequest {
        sources: sources.iter().map(|s| s.to_string()).collect(),
        start: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
        days_between: 1,
        chunk_size,
        filter: None,
        local_only: false,
    }
}

#[tokio::test]
async fn each_window_yields_its_newest_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let mut all = statuses("a.example", 1, 0..10);
    all.extend(statuses("a.example", 2, 0..10));
    let mock = MockSource::new().on_statuses("a.example", all);

    let report = run_sample(
        dir.path(),
        &request(&["a.example"], 3),
        &mock,
        &CrawlOptions::default(),
        &AtomicBool::new(false),
    )
    .await
    .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.windows, 2);
    assert_eq!(outcome.kept, 6);
    assert!(outcome.failure.is_none());

    let written = parse_timelines(&std::fs::read_to_string(report.output.unwrap()).unwrap()).unwrap();
    let mut ids: Vec<u64> = written["a.example"].iter().filter_map(|s| s.snowflake()).collect();
    ids.sort();
    assert_eq!(
        ids,
        vec![at(1, 7), at(1, 8), at(1, 9), at(2, 7), at(2, 8), at(2, 9)]
    );
}

#[tokio::test]
async fn sparse_window_stops_at_its_start() {
    let dir = tempfile::tempdir().unwrap();
    // Nothing on the 2nd, two statuses on the 1st, older history before that.
    let mut all = statuses("b.example", 1, 5..7);
    all.extend((0..5).map(|h| {
        fake_status("b.example", date_to_snowflake(Utc.with_ymd_and_hms(2022, 12, 31, h, 0, 0).unwrap()))
    }));
    let mock = MockSource::new().on_statuses("b.example", all);

    let report = run_sample(
        dir.path(),
        &request(&["b.example"], 3),
        &mock,
        &CrawlOptions::default(),
        &AtomicBool::new(false),
    )
    .await
    .unwrap();

    assert_eq!(report.outcomes[0].windows, 2);
    assert_eq!(report.outcomes[0].kept, 2);
}

#[tokio::test]
async fn failing_source_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockSource::new()
        .on_statuses("a.example", statuses("a.example", 1, 0..4))
        .on_failure("down.example", SourceFailure::Unreachable("connection refused".into()));

    let report = run_sample(
        dir.path(),
        &request(&["a.example", "down.example"], 10),
        &mock,
        &CrawlOptions::default(),
        &AtomicBool::new(false),
    )
    .await
    .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].kept, 4);
    assert_eq!(report.outcomes[1].windows, 0);
    assert!(report.outcomes[1].failure.is_some());
    assert!(report.to_string().contains("stopped: unreachable"));
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockSource::new();
    let options = CrawlOptions::default();
    let cancel = AtomicBool::new(false);

    assert!(run_sample(dir.path(), &request(&[], 3), &mock, &options, &cancel).await.is_err());
    assert!(run_sample(dir.path(), &request(&["a.example"], 0), &mock, &options, &cancel).await.is_err());

    let mut backwards = request(&["a.example"], 3);
    backwards.end = NaiveDate::from_ymd_opt(2022, 12, 1).unwrap();
    assert!(run_sample(dir.path(), &backwards, &mock, &options, &cancel).await.is_err());

    assert!(mock.calls().is_empty());
}
