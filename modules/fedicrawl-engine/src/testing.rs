// Test doubles for the crawl seams. No network: every source is an in-memory
// list of statuses served with the same paging semantics as a real timeline.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use fedicrawl_common::{Cursor, RawStatus};

use crate::traits::{
    AccountDirectory, FetchResult, InteractionSource, Page, SourceClient, SourceFailure, Timeline,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A minimal well-formed status with a numeric id.
pub fn fake_status(source: &str, id: u64) -> RawStatus {
    RawStatus::new(json!({
        "id": id.to_string(),
        "uri": format!("https://{source}/users/someone/statuses/{id}"),
        "created_at": "2023-01-05T12:00:00.000Z",
        "content": format!("<p>status {id}</p>"),
        "replies_count": 0,
        "reblogs_count": 0,
        "favourites_count": 0,
        "media_attachments": [],
        "mentions": [],
        "tags": [],
        "card": null,
        "poll": null,
        "account": {"id": "1", "acct": "someone", "url": format!("https://{source}/@someone"), "note": ""}
    }))
}

/// `count` statuses with consecutive ids starting at `first_id`.
pub fn fake_statuses(source: &str, first_id: u64, count: u64) -> Vec<RawStatus> {
    (first_id..first_id + count)
        .map(|id| fake_status(source, id))
        .collect()
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    After,
    Before,
}

struct Failure {
    after_calls: usize,
    failure: SourceFailure,
}

/// HashMap-backed source client. Unregistered sources serve empty timelines.
/// Builder pattern: `.on_statuses()`, `.on_failure()`, `.on_account()`, ...
pub struct MockSource {
    statuses: Mutex<HashMap<String, Vec<RawStatus>>>,
    failures: HashMap<String, Failure>,
    calls: Mutex<Vec<String>>,
    accounts: HashMap<(String, String), Value>,
    /// Account listings keyed by (kind, instance, owner id).
    listings: HashMap<(String, String, String), Vec<Value>>,
    status_by_id: HashMap<(String, String), Value>,
    contexts: HashMap<(String, String), (Vec<Value>, Vec<Value>)>,
    instances: HashMap<String, Value>,
    activity: HashMap<String, Vec<Value>>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            failures: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            accounts: HashMap::new(),
            listings: HashMap::new(),
            status_by_id: HashMap::new(),
            contexts: HashMap::new(),
            instances: HashMap::new(),
            activity: HashMap::new(),
        }
    }

    /// Statuses a source serves on every timeline.
    pub fn on_statuses(self, source: &str, statuses: Vec<RawStatus>) -> Self {
        self.push_statuses(source, statuses);
        self
    }

    /// Every fetch from `source` fails.
    pub fn on_failure(self, source: &str, failure: SourceFailure) -> Self {
        self.on_failure_after(source, 0, failure)
    }

    /// Fetches from `source` succeed `calls` times, then fail.
    pub fn on_failure_after(mut self, source: &str, calls: usize, failure: SourceFailure) -> Self {
        self.failures.insert(
            source.to_string(),
            Failure {
                after_calls: calls,
                failure,
            },
        );
        self
    }

    /// An account found on `instance` only by this exact search query.
    pub fn on_account(mut self, instance: &str, query: &str, account: Value) -> Self {
        self.accounts
            .insert((instance.to_string(), query.to_string()), account);
        self
    }

    pub fn on_followers(self, instance: &str, account_id: &str, followers: Vec<Value>) -> Self {
        self.on_listing("followers", instance, account_id, followers)
    }

    /// A status served by id on its home instance.
    pub fn on_status(mut self, instance: &str, status_id: &str, status: Value) -> Self {
        self.status_by_id
            .insert((instance.to_string(), status_id.to_string()), status);
        self
    }

    pub fn on_reblogged_by(self, instance: &str, status_id: &str, accounts: Vec<Value>) -> Self {
        self.on_listing("reblogged_by", instance, status_id, accounts)
    }

    pub fn on_favourited_by(self, instance: &str, status_id: &str, accounts: Vec<Value>) -> Self {
        self.on_listing("favourited_by", instance, status_id, accounts)
    }

    pub fn on_context(
        mut self,
        instance: &str,
        status_id: &str,
        ancestors: Vec<Value>,
        descendants: Vec<Value>,
    ) -> Self {
        self.contexts.insert(
            (instance.to_string(), status_id.to_string()),
            (ancestors, descendants),
        );
        self
    }

    fn on_listing(mut self, kind: &str, instance: &str, owner: &str, accounts: Vec<Value>) -> Self {
        self.listings.insert(
            (kind.to_string(), instance.to_string(), owner.to_string()),
            accounts,
        );
        self
    }

    pub fn on_instance(mut self, instance: &str, info: Value, activity: Vec<Value>) -> Self {
        self.instances.insert(instance.to_string(), info);
        self.activity.insert(instance.to_string(), activity);
        self
    }

    /// New upstream statuses appearing between runs.
    pub fn push_statuses(&self, source: &str, statuses: Vec<RawStatus>) {
        let mut all = self.statuses.lock().unwrap();
        let list = all.entry(source.to_string()).or_default();
        list.extend(statuses);
        list.sort_by_key(|s| s.snowflake().unwrap_or(0));
    }

    /// Number of page fetches made against `source`.
    pub fn fetch_count(&self, source: &str) -> usize {
        let prefix = format!("{source} ");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record_call(&self, source: &str, what: String) -> FetchResult<()> {
        let mut calls = self.calls.lock().unwrap();
        let previous = calls
            .iter()
            .filter(|c| c.starts_with(&format!("{source} ")))
            .count();
        calls.push(format!("{source} {what}"));
        match self.failures.get(source) {
            Some(f) if previous >= f.after_calls => Err(f.failure.clone()),
            _ => Ok(()),
        }
    }

    fn serve(&self, source: &str, direction: Direction, bound: u64, limit: u32) -> Page {
        let all = self.statuses.lock().unwrap();
        let list = all.get(source).map(Vec::as_slice).unwrap_or(&[]);
        let limit = limit as usize;

        let records: Vec<RawStatus> = match direction {
            Direction::After => list
                .iter()
                .filter(|s| s.snowflake().is_some_and(|id| id > bound))
                .take(limit)
                .cloned()
                .collect(),
            Direction::Before => list
                .iter()
                .rev()
                .filter(|s| s.snowflake().is_some_and(|id| id < bound))
                .take(limit)
                .cloned()
                .collect(),
        };

        let ids = records.iter().filter_map(RawStatus::snowflake);
        let (lowest, highest) = (ids.clone().min(), ids.max());
        Page {
            next: lowest.map(|id| link(source, Direction::Before, id, limit)),
            prev: highest.map(|id| link(source, Direction::After, id, limit)),
            records,
        }
    }

    fn follow(&self, source: &str, link: Option<&String>) -> FetchResult<Page> {
        let Some(link) = link else {
            return Ok(Page::default());
        };
        self.record_call(source, format!("follow {link}"))?;
        let (direction, bound, limit) = parse_link(link)
            .ok_or_else(|| SourceFailure::MalformedResponse(format!("bad link {link}")))?;
        Ok(self.serve(source, direction, bound, limit))
    }
}

fn link(source: &str, direction: Direction, id: u64, limit: usize) -> String {
    let dir = match direction {
        Direction::After => "after",
        Direction::Before => "before",
    };
    format!("mock://{source}/{dir}/{id}/{limit}")
}

fn parse_link(link: &str) -> Option<(Direction, u64, u32)> {
    let rest = link.strip_prefix("mock://")?;
    let mut parts = rest.rsplitn(4, '/');
    let limit = parts.next()?.parse().ok()?;
    let bound = parts.next()?.parse().ok()?;
    let direction = match parts.next()? {
        "after" => Direction::After,
        "before" => Direction::Before,
        _ => return None,
    };
    Some((direction, bound, limit))
}

#[async_trait]
impl SourceClient for MockSource {
    async fn fetch_page_forward(
        &self,
        source: &str,
        _timeline: &Timeline,
        cursor: &Cursor,
        limit: u32,
        _local_only: bool,
    ) -> FetchResult<Page> {
        self.record_call(source, format!("forward {}", cursor.to_snowflake()))?;
        Ok(self.serve(source, Direction::After, cursor.to_snowflake(), limit))
    }

    async fn fetch_page_backward(&self, source: &str, page: &Page) -> FetchResult<Page> {
        self.follow(source, page.prev.as_ref())
    }

    async fn fetch_page_before(
        &self,
        source: &str,
        _timeline: &Timeline,
        max_id: u64,
        limit: u32,
        _local_only: bool,
    ) -> FetchResult<Page> {
        self.record_call(source, format!("before {max_id}"))?;
        Ok(self.serve(source, Direction::Before, max_id, limit))
    }

    async fn fetch_page_next(&self, source: &str, page: &Page) -> FetchResult<Page> {
        self.follow(source, page.next.as_ref())
    }
}

#[async_trait]
impl AccountDirectory for MockSource {
    async fn find_account(&self, instance: &str, query: &str) -> FetchResult<Option<Value>> {
        self.record_call(instance, format!("search {query}"))?;
        Ok(self
            .accounts
            .get(&(instance.to_string(), query.to_string()))
            .cloned())
    }

    async fn followers_page(
        &self,
        instance: &str,
        account_id: &str,
        limit: u32,
    ) -> FetchResult<Page<Value>> {
        self.record_call(instance, format!("followers {account_id}"))?;
        Ok(self.listing_from("followers", instance, account_id, 0, limit as usize))
    }

    async fn next_accounts(&self, instance: &str, page: &Page<Value>) -> FetchResult<Page<Value>> {
        let Some(next) = &page.next else {
            return Ok(Page::default());
        };
        self.record_call(instance, format!("follow {next}"))?;
        let (kind, owner, offset, limit) = parse_listing_link(next)
            .ok_or_else(|| SourceFailure::MalformedResponse(format!("bad link {next}")))?;
        Ok(self.listing_from(&kind, instance, &owner, offset, limit))
    }

    async fn instance_info(&self, instance: &str) -> FetchResult<Value> {
        self.record_call(instance, "instance".to_string())?;
        self.instances
            .get(instance)
            .cloned()
            .ok_or_else(|| SourceFailure::NotFound(format!("no instance {instance}")))
    }

    async fn instance_activity(&self, instance: &str) -> FetchResult<Vec<Value>> {
        self.record_call(instance, "activity".to_string())?;
        self.activity
            .get(instance)
            .cloned()
            .ok_or_else(|| SourceFailure::NotFound(format!("no activity for {instance}")))
    }
}

#[async_trait]
impl InteractionSource for MockSource {
    async fn status(&self, instance: &str, status_id: &str) -> FetchResult<Value> {
        self.record_call(instance, format!("status {status_id}"))?;
        self.status_by_id
            .get(&(instance.to_string(), status_id.to_string()))
            .cloned()
            .ok_or_else(|| SourceFailure::NotFound(format!("no status {status_id}")))
    }

    async fn reblogged_by(
        &self,
        instance: &str,
        status_id: &str,
        limit: u32,
    ) -> FetchResult<Page<Value>> {
        self.record_call(instance, format!("reblogged_by {status_id}"))?;
        Ok(self.listing_from("reblogged_by", instance, status_id, 0, limit as usize))
    }

    async fn favourited_by(
        &self,
        instance: &str,
        status_id: &str,
        limit: u32,
    ) -> FetchResult<Page<Value>> {
        self.record_call(instance, format!("favourited_by {status_id}"))?;
        Ok(self.listing_from("favourited_by", instance, status_id, 0, limit as usize))
    }

    async fn context(
        &self,
        instance: &str,
        status_id: &str,
    ) -> FetchResult<(Vec<Value>, Vec<Value>)> {
        self.record_call(instance, format!("context {status_id}"))?;
        Ok(self
            .contexts
            .get(&(instance.to_string(), status_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

impl MockSource {
    fn listing_from(
        &self,
        kind: &str,
        instance: &str,
        owner: &str,
        offset: usize,
        limit: usize,
    ) -> Page<Value> {
        let all = self
            .listings
            .get(&(kind.to_string(), instance.to_string(), owner.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let records: Vec<Value> = all.iter().skip(offset).take(limit).cloned().collect();
        let end = offset + records.len();
        Page {
            next: (end < all.len())
                .then(|| format!("mock://{instance}/{kind}/{owner}/{end}/{limit}")),
            prev: None,
            records,
        }
    }
}

/// `mock://{instance}/{kind}/{owner}/{offset}/{limit}`
fn parse_listing_link(link: &str) -> Option<(String, String, usize, usize)> {
    let rest = link.strip_prefix("mock://")?;
    let parts: Vec<&str> = rest.split('/').collect();
    let [_, kind, owner, offset, limit] = parts.as_slice() else {
        return None;
    };
    Some((
        kind.to_string(),
        owner.to_string(),
        offset.parse().ok()?,
        limit.parse().ok()?,
    ))
}
