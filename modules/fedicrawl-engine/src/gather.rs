//! Gathering runs: followers of seed accounts, the domains they live on, and
//! metadata about those instances.

use std::collections::HashMap;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::{info, warn};

use fedicrawl_common::normalize::text_at;
use fedicrawl_common::{
    acct_domain, acct_to_string, normalize_account, normalize_instance, Account, Instance,
};

use crate::traits::{AccountDirectory, FetchResult, Page};

pub const FOLLOWERS_PAGE_LIMIT: u32 = 40;

/// A follower account and the profile URL of the seed account it follows.
#[derive(Debug, Clone, PartialEq)]
pub struct Follower {
    pub account: Value,
    pub followed: String,
}

/// Home instance and `@name@domain` search query for a profile URL.
/// Searches run without remote resolution, so only the handle form finds
/// the account.
pub fn profile_handle(account_url: &str) -> Option<(String, String)> {
    let url = account_url.trim();
    let handle = acct_to_string(&json!({ "url": url }));
    if handle == url {
        return None;
    }
    let domain = acct_domain(&json!({ "acct": handle }))?;
    let name = handle.rsplit_once('@')?.0;
    Some((domain.clone(), format!("@{name}@{domain}")))
}

async fn followers_of(
    directory: &dyn AccountDirectory,
    account_url: &str,
    max_followers: usize,
) -> FetchResult<Vec<Value>> {
    let Some((instance, query)) = profile_handle(account_url) else {
        warn!(account_url, "Not a profile URL, skipping");
        return Ok(Vec::new());
    };
    let Some(account) = directory.find_account(&instance, &query).await? else {
        warn!(account_url, query = %query, instance = %instance, "Account not found");
        return Ok(Vec::new());
    };
    let id = text_at(&account, "/id");
    if id.is_empty() {
        warn!(account_url, "Account has no id");
        return Ok(Vec::new());
    }

    let mut followers = Vec::new();
    let mut page: Page<Value> = directory
        .followers_page(&instance, &id, FOLLOWERS_PAGE_LIMIT)
        .await?;
    loop {
        let queried_at = Value::String(Utc::now().to_rfc3339());
        for mut follower in std::mem::take(&mut page.records) {
            if let Value::Object(map) = &mut follower {
                map.entry("queried_at").or_insert_with(|| queried_at.clone());
            }
            followers.push(follower);
        }
        if followers.len() >= max_followers || page.next.is_none() {
            break;
        }
        page = directory.next_accounts(&instance, &page).await?;
        if page.is_empty() {
            break;
        }
    }
    followers.truncate(max_followers);
    Ok(followers)
}

/// Collect up to `max_followers` followers of each seed account, in seed
/// order. Accounts that cannot be resolved or paged are logged and skipped.
pub async fn gather_followers(
    directory: &dyn AccountDirectory,
    account_urls: &[String],
    max_followers: usize,
    concurrency: usize,
) -> Vec<Follower> {
    let per_account: Vec<Vec<Follower>> = stream::iter(account_urls.iter().map(|url| async move {
        match followers_of(directory, url, max_followers).await {
            Ok(accounts) => {
                info!(account_url = %url, followers = accounts.len(), "Gathered followers");
                accounts
                    .into_iter()
                    .map(|account| Follower {
                        account,
                        followed: url.clone(),
                    })
                    .collect()
            }
            Err(e) => {
                warn!(account_url = %url, error = %e, "Failed to gather followers");
                Vec::new()
            }
        }
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await;

    per_account.into_iter().flatten().collect()
}

/// Follower home domains with at least `min_count` followers, most common
/// first. Equal counts keep first-seen order.
pub fn rank_domains(followers: &[Follower], min_count: usize) -> Vec<(String, usize)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<(String, usize)> = Vec::new();
    for follower in followers {
        let Some(domain) = acct_domain(&follower.account) else {
            continue;
        };
        match index.get(&domain) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(domain.clone(), counts.len());
                counts.push((domain, 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.retain(|(_, count)| *count >= min_count);
    counts
}

/// Flatten followers into account rows paired with the account they follow.
pub fn follower_rows(followers: &[Follower], parse_html: bool) -> Vec<(Account, String)> {
    followers
        .iter()
        .filter_map(|f| match normalize_account(&f.account, parse_html) {
            Ok(account) => Some((account, f.followed.clone())),
            Err(e) => {
                warn!(followed = %f.followed, error = %e, "Skipping malformed account");
                None
            }
        })
        .collect()
}

/// Fetch self-description and weekly activity for each domain. Either part
/// may be missing; an unreachable instance still yields a row.
pub async fn gather_instances(
    directory: &dyn AccountDirectory,
    domains: &[String],
    concurrency: usize,
    parse_html: bool,
) -> Vec<Instance> {
    stream::iter(domains.iter().map(|domain| async move {
        let info = directory
            .instance_info(domain)
            .await
            .inspect_err(|e| warn!(instance = %domain, error = %e, "Instance info unavailable"))
            .ok();
        let activity = directory
            .instance_activity(domain)
            .await
            .inspect_err(|e| warn!(instance = %domain, error = %e, "Instance activity unavailable"))
            .ok();
        normalize_instance(domain, info.as_ref(), activity.as_deref(), Utc::now(), parse_html)
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn follower(acct: &str) -> Follower {
        Follower {
            account: json!({"id": "1", "acct": acct}),
            followed: "https://seed.example/@seed".into(),
        }
    }

    #[test]
    fn domains_are_ranked_by_count_then_first_seen() {
        let followers = vec![
            follower("a@one.example"),
            follower("b@two.example"),
            follower("c@two.example"),
            follower("d@three.example"),
            follower("e@one.example"),
            follower("local"),
        ];
        let ranked = rank_domains(&followers, 1);
        assert_eq!(
            ranked,
            vec![
                ("one.example".to_string(), 2),
                ("two.example".to_string(), 2),
                ("three.example".to_string(), 1),
            ]
        );
        assert_eq!(rank_domains(&followers, 2).len(), 2);
    }

    #[test]
    fn profile_urls_become_handle_queries() {
        assert_eq!(
            profile_handle("https://Example.Social/@alice"),
            Some(("example.social".to_string(), "@alice@example.social".to_string()))
        );
        assert_eq!(
            profile_handle(" https://mastodon.social/@bob/ "),
            Some(("mastodon.social".to_string(), "@bob@mastodon.social".to_string()))
        );
        assert_eq!(profile_handle("https://pleroma.example/users/bob"), None);
        assert_eq!(profile_handle("alice"), None);
    }

    #[test]
    fn malformed_followers_are_dropped_from_rows() {
        let mut followers = vec![follower("a@one.example")];
        followers.push(Follower {
            account: json!({"acct": "no-id"}),
            followed: "x".into(),
        });
        let rows = follower_rows(&followers, false);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0.acct, "a@one.example");
    }
}
