use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="?([A-Za-z]+)"?"#).expect("valid regex"));

/// One page of a paginated endpoint.
///
/// Mastodon paginates through the `Link` header: `next` points at older items,
/// `prev` at newer ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub next: Option<String>,
    pub prev: Option<String>,
}

/// `(next, prev)` URLs from a `Link` header.
pub fn parse_link_header(header: &str) -> (Option<String>, Option<String>) {
    let mut next = None;
    let mut prev = None;
    for caps in LINK_RE.captures_iter(header) {
        let url = caps[1].to_string();
        match caps[2].to_ascii_lowercase().as_str() {
            "next" => next = Some(url),
            "prev" | "previous" => prev = Some(url),
            _ => {}
        }
    }
    (next, prev)
}

/// Query parameters shared by the timeline endpoints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimelineQuery {
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub local: bool,
}

impl TimelineQuery {
    /// Oldest-first paging from just above `min_id`.
    pub fn after(min_id: impl Into<String>, limit: u32, local: bool) -> Self {
        Self {
            limit,
            min_id: Some(min_id.into()),
            max_id: None,
            local,
        }
    }

    /// Newest-first paging from just below `max_id`.
    pub fn before(max_id: impl Into<String>, limit: u32, local: bool) -> Self {
        Self {
            limit,
            min_id: None,
            max_id: Some(max_id.into()),
            local,
        }
    }
}

/// Rate-limit bookkeeping from the `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimit {
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimit {
    pub fn from_headers(remaining: Option<&str>, reset: Option<&str>) -> Self {
        Self {
            remaining: remaining.and_then(|r| r.trim().parse().ok()),
            reset_at: reset
                .and_then(|r| DateTime::parse_from_rfc3339(r.trim()).ok())
                .map(|r| r.with_timezone(&Utc)),
        }
    }

    /// When the next request may be sent, if the budget is exhausted.
    pub fn paused_until(&self) -> Option<DateTime<Utc>> {
        match self.remaining {
            Some(0) => self.reset_at,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_header_yields_both_directions() {
        let header = r#"<https://m.example/api/v1/timelines/tag/rust?max_id=109>; rel="next", <https://m.example/api/v1/timelines/tag/rust?min_id=200>; rel="prev""#;
        let (next, prev) = parse_link_header(header);
        assert_eq!(next.as_deref(), Some("https://m.example/api/v1/timelines/tag/rust?max_id=109"));
        assert_eq!(prev.as_deref(), Some("https://m.example/api/v1/timelines/tag/rust?min_id=200"));
    }

    #[test]
    fn link_header_with_one_direction() {
        let (next, prev) = parse_link_header(r#"<https://m.example/a?max_id=1>; rel="next""#);
        assert!(next.is_some());
        assert!(prev.is_none());
        assert_eq!(parse_link_header(""), (None, None));
    }

    #[test]
    fn timeline_query_omits_unset_params() {
        let q = serde_json::to_value(TimelineQuery::after("42", 40, false)).unwrap();
        assert_eq!(q, serde_json::json!({"limit": 40, "min_id": "42"}));
        let q = serde_json::to_value(TimelineQuery::before("42", 20, true)).unwrap();
        assert_eq!(q, serde_json::json!({"limit": 20, "max_id": "42", "local": true}));
    }

    #[test]
    fn exhausted_budget_pauses_until_reset() {
        let rl = RateLimit::from_headers(Some("0"), Some("2023-01-05T12:40:00.000Z"));
        assert_eq!(
            rl.paused_until().map(|d| d.to_rfc3339()),
            Some("2023-01-05T12:40:00+00:00".to_string())
        );
        let rl = RateLimit::from_headers(Some("17"), Some("2023-01-05T12:40:00.000Z"));
        assert_eq!(rl.paused_until(), None);
        assert_eq!(RateLimit::from_headers(None, None), RateLimit::default());
    }
}
