// Seams between the crawl logic and the network.
//
// SourceClient pages through status timelines; AccountDirectory answers the
// account and instance lookups used by gathering runs; InteractionSource
// adds the per-status lookups. MastodonSource implements all three over
// HTTP; MockSource (test-support) implements them over HashMaps so the
// driver can be exercised without a network.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use fedicrawl_common::{Cursor, Predicate, RawStatus};
use mastodon_client::ClientError;

// ---------------------------------------------------------------------------
// Pages and failures
// ---------------------------------------------------------------------------

/// Which timeline of a source is being paged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Timeline {
    Hashtag(String),
    Public,
}

impl Timeline {
    pub fn for_predicate(predicate: &Predicate) -> Self {
        match predicate {
            Predicate::Hashtag(tag) => Timeline::Hashtag(tag.clone()),
            Predicate::Filter(_) | Predicate::Public => Timeline::Public,
        }
    }
}

/// An ordered page of results plus its pagination links. `next` leads to
/// older results, `prev` to newer ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T = RawStatus> {
    pub records: Vec<T>,
    pub next: Option<String>,
    pub prev: Option<String>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            next: None,
            prev: None,
        }
    }
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<mastodon_client::Page> for Page<RawStatus> {
    fn from(page: mastodon_client::Page) -> Self {
        Self {
            records: page.items.into_iter().map(RawStatus::new).collect(),
            next: page.next,
            prev: page.prev,
        }
    }
}

impl From<mastodon_client::Page> for Page<Value> {
    fn from(page: mastodon_client::Page) -> Self {
        Self {
            records: page.items,
            next: page.next,
            prev: page.prev,
        }
    }
}

/// Why a fetch from one source failed. Never fatal to a job.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceFailure {
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("rate limited")]
    RateLimited,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl From<ClientError> for SourceFailure {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Unreachable(msg) | ClientError::InvalidUrl(msg) => {
                SourceFailure::Unreachable(msg)
            }
            ClientError::RateLimited { .. } => SourceFailure::RateLimited,
            ClientError::NotFound(msg) => SourceFailure::NotFound(msg),
            ClientError::Malformed(msg) => SourceFailure::MalformedResponse(msg),
        }
    }
}

pub type FetchResult<T> = std::result::Result<T, SourceFailure>;

// ---------------------------------------------------------------------------
// SourceClient
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Oldest-first page of records strictly newer than `cursor`.
    async fn fetch_page_forward(
        &self,
        source: &str,
        timeline: &Timeline,
        cursor: &Cursor,
        limit: u32,
        local_only: bool,
    ) -> FetchResult<Page>;

    /// The page of newer records linked from `page` (its `prev` link).
    /// An empty page when there is no such link.
    async fn fetch_page_backward(&self, source: &str, page: &Page) -> FetchResult<Page>;

    /// Newest-first page of records strictly older than `max_id`.
    async fn fetch_page_before(
        &self,
        source: &str,
        timeline: &Timeline,
        max_id: u64,
        limit: u32,
        local_only: bool,
    ) -> FetchResult<Page>;

    /// The page of older records linked from `page` (its `next` link).
    /// An empty page when there is no such link.
    async fn fetch_page_next(&self, source: &str, page: &Page) -> FetchResult<Page>;
}

// ---------------------------------------------------------------------------
// AccountDirectory
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Resolve an account on its home `instance` by `@name@domain` handle.
    async fn find_account(&self, instance: &str, query: &str) -> FetchResult<Option<Value>>;

    async fn followers_page(
        &self,
        instance: &str,
        account_id: &str,
        limit: u32,
    ) -> FetchResult<Page<Value>>;

    /// Next page of an account listing (followers, boosters, favouriters)
    /// linked from `page`; empty when there is no link.
    async fn next_accounts(&self, instance: &str, page: &Page<Value>) -> FetchResult<Page<Value>>;

    async fn instance_info(&self, instance: &str) -> FetchResult<Value>;

    /// Weekly activity buckets, most recent first.
    async fn instance_activity(&self, instance: &str) -> FetchResult<Vec<Value>>;
}

// ---------------------------------------------------------------------------
// InteractionSource
// ---------------------------------------------------------------------------

/// Per-status lookups on a status's home instance. Account listings page
/// through [`AccountDirectory::next_accounts`].
#[async_trait]
pub trait InteractionSource: AccountDirectory {
    async fn status(&self, instance: &str, status_id: &str) -> FetchResult<Value>;

    async fn reblogged_by(
        &self,
        instance: &str,
        status_id: &str,
        limit: u32,
    ) -> FetchResult<Page<Value>>;

    async fn favourited_by(
        &self,
        instance: &str,
        status_id: &str,
        limit: u32,
    ) -> FetchResult<Page<Value>>;

    /// `(ancestors, descendants)` of a status.
    async fn context(&self, instance: &str, status_id: &str)
        -> FetchResult<(Vec<Value>, Vec<Value>)>;
}
