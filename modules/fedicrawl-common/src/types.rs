use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Raw records ---

/// A status exactly as a source returned it.
///
/// Sources disagree on which optional attributes they emit, so the raw shape is
/// kept as JSON and only the handful of attributes the crawl engine itself
/// depends on get typed accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawStatus(pub Value);

impl RawStatus {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Source-local identifier. Mastodon sends strings; some servers send numbers.
    pub fn id(&self) -> Option<String> {
        match self.0.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The identifier as an ordered snowflake, when it is numeric.
    pub fn snowflake(&self) -> Option<u64> {
        self.id()?.parse().ok()
    }

    /// Origin URI; stable across every source that federated this status.
    pub fn uri(&self) -> Option<&str> {
        self.0.get("uri").and_then(Value::as_str)
    }

    pub fn content(&self) -> &str {
        self.0.get("content").and_then(Value::as_str).unwrap_or("")
    }

    pub fn account(&self) -> Option<&Value> {
        self.0.get("account").filter(|a| a.is_object())
    }

    /// Profile text of the author, `""` when absent.
    pub fn author_note(&self) -> &str {
        self.account()
            .and_then(|a| a.get("note"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// replies + reblogs + favourites. Missing counters count as zero.
    pub fn engagement(&self) -> u64 {
        ["replies_count", "reblogs_count", "favourites_count"]
            .iter()
            .map(|key| self.0.get(*key).and_then(Value::as_u64).unwrap_or(0))
            .sum()
    }

    /// Stamp the capture time. A status that already carries one keeps it.
    pub fn stamp_queried_at(&mut self, at: DateTime<Utc>) {
        if let Value::Object(map) = &mut self.0 {
            map.entry("queried_at")
                .or_insert_with(|| Value::String(at.to_rfc3339()));
        }
    }

    /// Replace the source-local identifier (aggregation re-keys by URI).
    pub fn set_id(&mut self, id: &str) {
        if let Value::Object(map) = &mut self.0 {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
    }
}

/// Raw statuses grouped by the source that served them: the shape of every
/// timelines file a crawl cycle writes.
pub type Timelines = BTreeMap<String, Vec<RawStatus>>;

// --- Search predicate ---

/// What a crawl job is looking for. Persisted with the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    /// Hashtag timeline, tag stored without `#` and lowercased.
    Hashtag(String),
    /// Public timeline, kept only when `content` contains the text.
    Filter(String),
    /// Public timeline, unfiltered.
    Public,
}

impl Predicate {
    pub fn hashtag(tag: &str) -> Self {
        Predicate::Hashtag(tag.trim().trim_start_matches('#').to_lowercase())
    }

    /// Free-text filter applied to `content` after fetch, if any.
    pub fn content_filter(&self) -> Option<&str> {
        match self {
            Predicate::Filter(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::Hashtag(tag) => write!(f, "#{tag}"),
            Predicate::Filter(text) => write!(f, "'{text}'"),
            Predicate::Public => write!(f, "public timeline"),
        }
    }
}
