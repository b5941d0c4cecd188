//! Follower and instance gathering against MockSource.

use serde_json::{json, Value};

use fedicrawl_engine::export::{write_followers_csv, write_instances_csv};
use fedicrawl_engine::gather::{follower_rows, gather_followers, gather_instances, rank_domains};
use fedicrawl_engine::testing::MockSource;

const SEED: &str = "https://seed.example/@alice";
const SEED_HANDLE: &str = "@alice@seed.example";

/// 90 followers; every third lives on two.example, the rest on one.example.
fn followers() -> Vec<Value> {
    (0..90)
        .map(|i| {
            let domain = if i % 3 == 0 { "two.example" } else { "one.example" };
            json!({"id": i.to_string(), "acct": format!("user{i}@{domain}"), "username": format!("user{i}")})
        })
        .collect()
}

fn seeded() -> MockSource {
    MockSource::new()
        .on_account("seed.example", SEED_HANDLE, json!({"id": "7", "acct": "alice"}))
        .on_followers("seed.example", "7", followers())
}

#[tokio::test]
async fn followers_are_paged_up_to_the_limit() {
    let mock = seeded();

    let gathered = gather_followers(&mock, &[SEED.to_string()], 50, 2).await;

    assert_eq!(gathered.len(), 50);
    assert!(gathered.iter().all(|f| f.followed == SEED));
    assert!(gathered.iter().all(|f| f.account.get("queried_at").is_some()));
    // search, first page, one continuation
    assert_eq!(mock.fetch_count("seed.example"), 3);
}

#[tokio::test]
async fn seeds_are_searched_by_handle_on_their_home_instance() {
    let mock = seeded();

    gather_followers(&mock, &[SEED.to_string()], 10, 1).await;

    let calls = mock.calls();
    assert_eq!(calls[0], "seed.example search @alice@seed.example");
    assert!(!calls.iter().any(|c| c.contains("https://")));
}

#[tokio::test]
async fn unknown_and_invalid_seeds_are_skipped() {
    let mock = seeded();
    let urls = vec![
        "not a url".to_string(),
        "https://nowhere.example/@ghost".to_string(),
        SEED.to_string(),
    ];

    let gathered = gather_followers(&mock, &urls, 400, 4).await;

    assert_eq!(gathered.len(), 90);
    assert_eq!(mock.fetch_count("nowhere.example"), 1);
    assert!(mock
        .calls()
        .contains(&"nowhere.example search @ghost@nowhere.example".to_string()));
}

#[tokio::test]
async fn domains_rank_by_follower_count() {
    let gathered = gather_followers(&seeded(), &[SEED.to_string()], 50, 1).await;

    assert_eq!(
        rank_domains(&gathered, 1),
        vec![("one.example".to_string(), 33), ("two.example".to_string(), 17)]
    );
    assert_eq!(rank_domains(&gathered, 20), vec![("one.example".to_string(), 33)]);
}

#[tokio::test]
async fn instances_yield_rows_even_when_unreachable() {
    let activity = vec![
        json!({"week": "1700000000", "statuses": "999", "logins": "1", "registrations": "0"}),
        json!({"week": "1699395200", "statuses": "10", "logins": "4", "registrations": "1"}),
        json!({"week": "1698790400", "statuses": "20", "logins": "6", "registrations": "3"}),
    ];
    let mock = MockSource::new().on_instance(
        "one.example",
        json!({"uri": "one.example", "title": "One", "stats": {"user_count": 12}}),
        activity,
    );
    let domains = vec!["one.example".to_string(), "two.example".to_string()];

    let instances = gather_instances(&mock, &domains, 2, false).await;

    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].title, "One");
    assert_eq!(instances[0].user_count, "12");
    assert_eq!(instances[0].weekly_statuses, "15");
    assert_eq!(instances[0].weekly_logins, "5");
    assert_eq!(instances[0].weekly_registrations, "2");
    assert_eq!(instances[1].uri, "two.example");
    assert_eq!(instances[1].title, "");
    assert_eq!(instances[1].weekly_statuses, "");
}

#[tokio::test]
async fn gathered_rows_are_written_as_csv() {
    let dir = tempfile::tempdir().unwrap();
    let gathered = gather_followers(&seeded(), &[SEED.to_string()], 5, 1).await;
    let rows = follower_rows(&gathered, false);
    let followers_csv = dir.path().join("followers.csv");
    write_followers_csv(&followers_csv, &rows).unwrap();

    let mut reader = csv::Reader::from_path(&followers_csv).unwrap();
    let header = reader.headers().unwrap().clone();
    assert_eq!(header.get(0), Some("id"));
    assert_eq!(header.iter().last(), Some("followed_account"));
    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 5);
    assert_eq!(records[0].iter().last(), Some(SEED));

    let instances_csv = dir.path().join("instances.csv");
    let mock = MockSource::new();
    let instances = gather_instances(&mock, &["one.example".to_string()], 1, false).await;
    write_instances_csv(&instances_csv, &instances, true).unwrap();
    write_instances_csv(&instances_csv, &instances, true).unwrap();

    let mut reader = csv::Reader::from_path(&instances_csv).unwrap();
    assert_eq!(reader.headers().unwrap().get(0), Some("uri"));
    assert_eq!(reader.records().count(), 2);
}
