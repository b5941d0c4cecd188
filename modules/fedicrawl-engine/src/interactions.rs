//! Who boosted, favourited and replied around a set of statuses.
//!
//! Every lookup goes to the status's home instance, the host of its `uri`,
//! where the counts and the thread are authoritative.

use std::collections::HashSet;
use std::fmt;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use fedicrawl_common::normalize::text_at;
use fedicrawl_common::{acct_to_string, html_to_text, normalize_account, Account, RawStatus};

use crate::aggregate::parse_timelines;
use crate::traits::{FetchResult, InteractionSource, Page};

/// Accounts per page of a boost or favourite listing; the API maximum.
pub const ACCOUNTS_PAGE_LIMIT: u32 = 80;

pub const INTERACTION_COLUMNS: [&str; 5] =
    ["destination", "source", "kind", "dest_content", "src_content"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Reblog,
    Favourite,
    Ancestor,
    Descendant,
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            InteractionKind::Reblog => "reblog",
            InteractionKind::Favourite => "favourite",
            InteractionKind::Ancestor => "ancestor",
            InteractionKind::Descendant => "descendant",
        })
    }
}

/// Everything gathered about one status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusInteractions {
    pub uri: String,
    /// The status as its home instance serves it. `None` when it was
    /// deleted or the instance could not be asked.
    pub status: Option<Value>,
    pub reblogged_by: Vec<Value>,
    pub favourited_by: Vec<Value>,
    pub ancestors: Vec<Value>,
    pub descendants: Vec<Value>,
}

/// One edge between the author of a status and an account or post that
/// interacted with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionRow {
    pub destination: String,
    pub source: String,
    pub kind: String,
    pub dest_content: String,
    pub src_content: String,
}

// --- Input ---

/// Statuses to look up: either a plain array of statuses or a timelines
/// document, whose lists are flattened in source order.
pub fn parse_statuses(content: &str) -> Result<Vec<RawStatus>> {
    let value: Value = serde_json::from_str(content).context("Statuses file is not JSON")?;
    if value.is_array() {
        return serde_json::from_value(value).context("Statuses array is malformed");
    }
    let timelines = parse_timelines(content).context("Expected a status array or timelines document")?;
    Ok(timelines.into_values().flatten().collect())
}

/// Home instance and home id of a status, from its `uri`
/// (`https://<instance>/.../<id>`).
pub fn home_of(status: &RawStatus) -> Option<(String, String)> {
    let uri = status.uri()?;
    let instance = Url::parse(uri).ok()?.host_str()?.to_lowercase();
    let stem = uri.trim_end_matches(|c: char| c.is_ascii_digit());
    let id = &uri[stem.len()..];
    (!id.is_empty()).then(|| (instance, id.to_string()))
}

// --- Gathering ---

/// Drain an account listing. A failing page ends the listing but keeps
/// what was already collected.
async fn collect_accounts(
    source: &dyn InteractionSource,
    instance: &str,
    uri: &str,
    kind: InteractionKind,
    first: FetchResult<Page<Value>>,
) -> Vec<Value> {
    let mut accounts = Vec::new();
    let mut next = first;
    loop {
        let mut page = match next {
            Ok(page) => page,
            Err(e) => {
                warn!(uri, kind = %kind, error = %e, collected = accounts.len(), "Listing interrupted");
                break;
            }
        };
        let more = page.next.is_some() && !page.is_empty();
        let queried_at = Value::String(Utc::now().to_rfc3339());
        for mut account in std::mem::take(&mut page.records) {
            if let Value::Object(map) = &mut account {
                map.entry("queried_at").or_insert_with(|| queried_at.clone());
            }
            accounts.push(account);
        }
        if !more {
            break;
        }
        next = source.next_accounts(instance, &page).await;
    }
    accounts
}

async fn interactions_of(source: &dyn InteractionSource, status: &RawStatus) -> StatusInteractions {
    let uri = status.uri().unwrap_or_default().to_string();
    let mut found = StatusInteractions {
        uri: uri.clone(),
        ..Default::default()
    };
    let Some((instance, id)) = home_of(status) else {
        warn!(uri = %uri, "No home instance in uri, skipping");
        return found;
    };

    match source.status(&instance, &id).await {
        Ok(home) => found.status = Some(home),
        Err(e) => {
            warn!(uri = %uri, instance = %instance, error = %e, "Status unavailable on its home instance");
            return found;
        }
    }

    let first = source.reblogged_by(&instance, &id, ACCOUNTS_PAGE_LIMIT).await;
    found.reblogged_by = collect_accounts(source, &instance, &uri, InteractionKind::Reblog, first).await;
    let first = source.favourited_by(&instance, &id, ACCOUNTS_PAGE_LIMIT).await;
    found.favourited_by =
        collect_accounts(source, &instance, &uri, InteractionKind::Favourite, first).await;

    match source.context(&instance, &id).await {
        Ok((ancestors, descendants)) => {
            found.ancestors = ancestors;
            found.descendants = descendants;
        }
        Err(e) => warn!(uri = %uri, error = %e, "Thread unavailable"),
    }

    info!(
        uri = %uri,
        reblogs = found.reblogged_by.len(),
        favourites = found.favourited_by.len(),
        ancestors = found.ancestors.len(),
        descendants = found.descendants.len(),
        "Gathered interactions"
    );
    found
}

/// Look up interactions for each distinct status `uri`, in input order.
pub async fn gather_interactions(
    source: &dyn InteractionSource,
    statuses: &[RawStatus],
    concurrency: usize,
) -> Vec<StatusInteractions> {
    let mut seen = HashSet::new();
    let distinct: Vec<&RawStatus> = statuses
        .iter()
        .filter(|s| s.uri().is_some_and(|uri| seen.insert(uri.to_string())))
        .collect();

    stream::iter(distinct.into_iter().map(|status| interactions_of(source, status)))
        .buffered(concurrency.max(1))
        .collect()
        .await
}

// --- Flattening ---

fn content_of(post: &Value, parse_html: bool) -> String {
    let content = text_at(post, "/content");
    if parse_html {
        html_to_text(&content)
    } else {
        content
    }
}

fn handle_of(post: &Value) -> String {
    post.get("account").map(acct_to_string).unwrap_or_default()
}

/// One row per interaction. Statuses that could not be fetched from their
/// home instance contribute nothing.
pub fn interaction_rows(found: &[StatusInteractions], parse_html: bool) -> Vec<InteractionRow> {
    let mut rows = Vec::new();
    for item in found {
        let Some(status) = &item.status else {
            continue;
        };
        let destination = handle_of(status);
        let dest_content = content_of(status, parse_html);
        let row = |source: String, kind: InteractionKind, src_content: String| InteractionRow {
            destination: destination.clone(),
            source,
            kind: kind.to_string(),
            dest_content: dest_content.clone(),
            src_content,
        };

        for account in &item.reblogged_by {
            rows.push(row(acct_to_string(account), InteractionKind::Reblog, String::new()));
        }
        for account in &item.favourited_by {
            rows.push(row(acct_to_string(account), InteractionKind::Favourite, String::new()));
        }
        for post in &item.ancestors {
            rows.push(row(handle_of(post), InteractionKind::Ancestor, content_of(post, parse_html)));
        }
        for post in &item.descendants {
            rows.push(row(handle_of(post), InteractionKind::Descendant, content_of(post, parse_html)));
        }
    }
    rows
}

/// Boosting and favouriting accounts as account rows, each paired with the
/// interaction kind and the status `uri`.
pub fn interaction_accounts(found: &[StatusInteractions], parse_html: bool) -> Vec<(Account, Vec<String>)> {
    let listings = found.iter().flat_map(|item| {
        let reblogs = item.reblogged_by.iter().map(move |a| (a, InteractionKind::Reblog, item));
        let favourites = item.favourited_by.iter().map(move |a| (a, InteractionKind::Favourite, item));
        reblogs.chain(favourites)
    });

    listings
        .filter_map(|(raw, kind, item)| match normalize_account(raw, parse_html) {
            Ok(account) => Some((account, vec![kind.to_string(), item.uri.clone()])),
            Err(e) => {
                warn!(uri = %item.uri, kind = %kind, error = %e, "Skipping malformed account");
                None
            }
        })
        .collect()
}
