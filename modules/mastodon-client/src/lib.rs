pub mod error;
pub mod types;

pub use error::{ClientError, Result};
pub use types::{parse_link_header, Page, RateLimit, TimelineQuery};

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::LINK;
use serde::Serialize;
use serde_json::Value;
use url::Url;

/// Longest the client will sleep waiting for a rate-limit window to reset.
const MAX_PAUSE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    pub timeout: Duration,
    /// Bearer token for this instance, if any.
    pub token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("mastodon-client/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
            token: None,
        }
    }
}

/// Client bound to a single instance.
pub struct MastodonClient {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    paused_until: Mutex<Option<DateTime<Utc>>>,
}

impl MastodonClient {
    /// `instance` is a bare domain (`mastodon.social`) or a base URL.
    pub fn new(instance: &str, config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url(instance)?,
            token: config.token.filter(|t| !t.is_empty()),
            paused_until: Mutex::new(None),
        })
    }

    pub fn instance(&self) -> &str {
        self.base_url.host_str().unwrap_or_default()
    }

    // --- Timelines ---

    pub async fn hashtag_timeline(&self, tag: &str, query: &TimelineQuery) -> Result<Page> {
        let tag = tag.trim_start_matches('#');
        let url = self.endpoint(&format!("api/v1/timelines/tag/{tag}"))?;
        self.get_page(url, Some(query)).await
    }

    pub async fn public_timeline(&self, query: &TimelineQuery) -> Result<Page> {
        let url = self.endpoint("api/v1/timelines/public")?;
        self.get_page(url, Some(query)).await
    }

    /// Fetch a page by the URL another page linked to.
    pub async fn follow(&self, link: &str) -> Result<Page> {
        let url = Url::parse(link)?;
        let host = url.host_str().unwrap_or_default();
        if host != self.instance() {
            tracing::warn!(
                instance = self.instance(),
                link_host = host,
                "Pagination link points at another host, not following"
            );
            return Err(ClientError::InvalidUrl(format!(
                "pagination link host {host} differs from instance {}",
                self.instance()
            )));
        }
        self.get_page::<()>(url, None).await
    }

    // --- Accounts ---

    /// Look an account up by its `@name@domain` handle, without asking the
    /// instance to resolve remote accounts. Query the account's home
    /// instance so the handle is local there.
    pub async fn search_account(&self, query: &str) -> Result<Option<Value>> {
        let url = self.endpoint("api/v2/search")?;
        let params = [("q", query), ("type", "accounts"), ("resolve", "false")];
        let body = self.get_json(url, Some(&params)).await?;
        Ok(body
            .get("accounts")
            .and_then(Value::as_array)
            .and_then(|accounts| accounts.first())
            .cloned())
    }

    pub async fn account_followers(&self, account_id: &str, limit: u32) -> Result<Page> {
        let url = self.endpoint(&format!("api/v1/accounts/{account_id}/followers"))?;
        self.get_page(url, Some(&[("limit", limit)])).await
    }

    // --- Statuses ---

    /// A status by its id on this instance.
    pub async fn status(&self, status_id: &str) -> Result<Value> {
        let url = self.endpoint(&format!("api/v1/statuses/{status_id}"))?;
        self.get_json::<()>(url, None).await
    }

    /// Accounts that boosted a status.
    pub async fn reblogged_by(&self, status_id: &str, limit: u32) -> Result<Page> {
        let url = self.endpoint(&format!("api/v1/statuses/{status_id}/reblogged_by"))?;
        self.get_page(url, Some(&[("limit", limit)])).await
    }

    /// Accounts that favourited a status.
    pub async fn favourited_by(&self, status_id: &str, limit: u32) -> Result<Page> {
        let url = self.endpoint(&format!("api/v1/statuses/{status_id}/favourited_by"))?;
        self.get_page(url, Some(&[("limit", limit)])).await
    }

    /// The thread around a status as `(ancestors, descendants)`.
    pub async fn context(&self, status_id: &str) -> Result<(Vec<Value>, Vec<Value>)> {
        let url = self.endpoint(&format!("api/v1/statuses/{status_id}/context"))?;
        let body = self.get_json::<()>(url, None).await?;
        let list = |key: &str| -> Result<Vec<Value>> {
            match body.get(key) {
                Some(Value::Array(items)) => Ok(items.clone()),
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(other) => Err(ClientError::Malformed(format!(
                    "expected {key} array, got {}",
                    json_kind(other)
                ))),
            }
        };
        Ok((list("ancestors")?, list("descendants")?))
    }

    // --- Instance ---

    pub async fn instance_info(&self) -> Result<Value> {
        let url = self.endpoint("api/v1/instance")?;
        self.get_json::<()>(url, None).await
    }

    /// Weekly activity buckets, most recent first.
    pub async fn instance_activity(&self) -> Result<Vec<Value>> {
        let url = self.endpoint("api/v1/instance/activity")?;
        match self.get_json::<()>(url, None).await? {
            Value::Array(weeks) => Ok(weeks),
            other => Err(ClientError::Malformed(format!(
                "expected activity array, got {}",
                json_kind(&other)
            ))),
        }
    }

    // --- Plumbing ---

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn get_page<Q: Serialize + ?Sized>(&self, url: Url, query: Option<&Q>) -> Result<Page> {
        let resp = self.send(url, query).await?;
        let (next, prev) = resp
            .headers()
            .get(LINK)
            .and_then(|h| h.to_str().ok())
            .map(parse_link_header)
            .unwrap_or_default();

        let items = match resp.json::<Value>().await? {
            Value::Array(items) => items,
            other => {
                return Err(ClientError::Malformed(format!(
                    "expected array, got {}",
                    json_kind(&other)
                )))
            }
        };
        Ok(Page { items, next, prev })
    }

    async fn get_json<Q: Serialize + ?Sized>(&self, url: Url, query: Option<&Q>) -> Result<Value> {
        let resp = self.send(url, query).await?;
        Ok(resp.json().await?)
    }

    async fn send<Q: Serialize + ?Sized>(
        &self,
        url: Url,
        query: Option<&Q>,
    ) -> Result<reqwest::Response> {
        self.wait_for_budget().await;

        let mut req = self.client.get(url.clone());
        if let Some(query) = query {
            req = req.query(query);
        }
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        tracing::debug!(url = %url, "GET");
        let resp = req.send().await?;
        self.record_budget(&resp);

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status.as_u16(), &body));
        }
        Ok(resp)
    }

    fn record_budget(&self, resp: &reqwest::Response) {
        let header = |name: &str| resp.headers().get(name).and_then(|v| v.to_str().ok());
        let limit = RateLimit::from_headers(
            header("x-ratelimit-remaining"),
            header("x-ratelimit-reset"),
        );
        if let Ok(mut paused) = self.paused_until.lock() {
            *paused = limit.paused_until();
        }
    }

    async fn wait_for_budget(&self) {
        let until = self.paused_until.lock().ok().and_then(|p| *p);
        let Some(until) = until else { return };

        let wait = (until - Utc::now())
            .to_std()
            .unwrap_or_default()
            .min(MAX_PAUSE);
        if !wait.is_zero() {
            tracing::info!(
                instance = self.instance(),
                wait_secs = wait.as_secs(),
                "Rate limit exhausted, pausing"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

fn base_url(instance: &str) -> Result<Url> {
    let instance = instance.trim().trim_end_matches('/');
    if instance.is_empty() {
        return Err(ClientError::InvalidUrl("empty instance name".to_string()));
    }
    let raw = if instance.contains("://") {
        format!("{instance}/")
    } else {
        format!("https://{instance}/")
    };
    let url = Url::parse(&raw)?;
    if url.host_str().is_none() {
        return Err(ClientError::InvalidUrl(raw));
    }
    Ok(url)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_domains_become_https_base_urls() {
        assert_eq!(base_url("mastodon.social").unwrap().as_str(), "https://mastodon.social/");
        assert_eq!(base_url("http://localhost:3000/").unwrap().as_str(), "http://localhost:3000/");
        assert!(base_url("  ").is_err());
    }

    #[test]
    fn endpoints_join_under_the_instance() {
        let client = MastodonClient::new("m.example", ClientConfig::default()).unwrap();
        assert_eq!(
            client.endpoint("api/v1/timelines/tag/rust").unwrap().as_str(),
            "https://m.example/api/v1/timelines/tag/rust"
        );
        assert_eq!(client.instance(), "m.example");
    }

    #[test]
    fn status_endpoints_are_per_status() {
        let client = MastodonClient::new("m.example", ClientConfig::default()).unwrap();
        assert_eq!(
            client.endpoint("api/v1/statuses/42/reblogged_by").unwrap().as_str(),
            "https://m.example/api/v1/statuses/42/reblogged_by"
        );
    }

    #[tokio::test]
    async fn links_to_other_hosts_are_refused() {
        let client = MastodonClient::new("m.example", ClientConfig::default()).unwrap();
        let err = client.follow("https://elsewhere.example/api/v1/timelines/public").await;
        match err {
            Err(ClientError::InvalidUrl(msg)) => {
                assert!(msg.contains("elsewhere.example"), "{msg}");
                assert!(msg.contains("m.example"), "{msg}");
            }
            other => panic!("expected InvalidUrl, got {:?}", other.map(|p| p.items.len())),
        }
    }
}
