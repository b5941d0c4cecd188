//! HTTP implementation of the crawl seams over the Mastodon REST API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use fedicrawl_common::{CrawlSettings, Credentials, Cursor};
use mastodon_client::{ClientConfig, MastodonClient, TimelineQuery};

use crate::traits::{
    AccountDirectory, FetchResult, InteractionSource, Page, SourceClient, SourceFailure, Timeline,
};

/// One lazily-built client per instance, each with that instance's token.
pub struct MastodonSource {
    settings: CrawlSettings,
    credentials: Credentials,
    clients: Mutex<HashMap<String, Arc<MastodonClient>>>,
}

impl MastodonSource {
    pub fn new(settings: CrawlSettings, credentials: Credentials) -> Self {
        Self {
            settings,
            credentials,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, instance: &str) -> FetchResult<Arc<MastodonClient>> {
        let key = instance.trim().to_lowercase();
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| SourceFailure::Unreachable("client cache poisoned".to_string()))?;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let config = ClientConfig {
            user_agent: self.settings.user_agent.clone(),
            timeout: self.settings.request_timeout,
            token: self.credentials.token_for(&key).map(str::to_string),
        };
        let client = Arc::new(MastodonClient::new(&key, config)?);
        clients.insert(key, client.clone());
        Ok(client)
    }

    async fn timeline_page(
        &self,
        source: &str,
        timeline: &Timeline,
        query: TimelineQuery,
    ) -> FetchResult<Page> {
        let client = self.client(source)?;
        let page = match timeline {
            Timeline::Hashtag(tag) => client.hashtag_timeline(tag, &query).await?,
            Timeline::Public => client.public_timeline(&query).await?,
        };
        Ok(page.into())
    }

    async fn follow(&self, source: &str, link: Option<&String>) -> FetchResult<mastodon_client::Page> {
        match link {
            Some(link) => Ok(self.client(source)?.follow(link).await?),
            None => Ok(mastodon_client::Page::default()),
        }
    }
}

#[async_trait]
impl SourceClient for MastodonSource {
    async fn fetch_page_forward(
        &self,
        source: &str,
        timeline: &Timeline,
        cursor: &Cursor,
        limit: u32,
        local_only: bool,
    ) -> FetchResult<Page> {
        let query = TimelineQuery::after(cursor.as_query_value(), limit, local_only);
        self.timeline_page(source, timeline, query).await
    }

    async fn fetch_page_backward(&self, source: &str, page: &Page) -> FetchResult<Page> {
        Ok(self.follow(source, page.prev.as_ref()).await?.into())
    }

    async fn fetch_page_before(
        &self,
        source: &str,
        timeline: &Timeline,
        max_id: u64,
        limit: u32,
        local_only: bool,
    ) -> FetchResult<Page> {
        let query = TimelineQuery::before(max_id.to_string(), limit, local_only);
        self.timeline_page(source, timeline, query).await
    }

    async fn fetch_page_next(&self, source: &str, page: &Page) -> FetchResult<Page> {
        Ok(self.follow(source, page.next.as_ref()).await?.into())
    }
}

#[async_trait]
impl AccountDirectory for MastodonSource {
    async fn find_account(&self, instance: &str, query: &str) -> FetchResult<Option<Value>> {
        Ok(self.client(instance)?.search_account(query).await?)
    }

    async fn followers_page(
        &self,
        instance: &str,
        account_id: &str,
        limit: u32,
    ) -> FetchResult<Page<Value>> {
        Ok(self
            .client(instance)?
            .account_followers(account_id, limit)
            .await?
            .into())
    }

    async fn next_accounts(&self, instance: &str, page: &Page<Value>) -> FetchResult<Page<Value>> {
        Ok(self.follow(instance, page.next.as_ref()).await?.into())
    }

    async fn instance_info(&self, instance: &str) -> FetchResult<Value> {
        Ok(self.client(instance)?.instance_info().await?)
    }

    async fn instance_activity(&self, instance: &str) -> FetchResult<Vec<Value>> {
        Ok(self.client(instance)?.instance_activity().await?)
    }
}

#[async_trait]
impl InteractionSource for MastodonSource {
    async fn status(&self, instance: &str, status_id: &str) -> FetchResult<Value> {
        Ok(self.client(instance)?.status(status_id).await?)
    }

    async fn reblogged_by(
        &self,
        instance: &str,
        status_id: &str,
        limit: u32,
    ) -> FetchResult<Page<Value>> {
        Ok(self
            .client(instance)?
            .reblogged_by(status_id, limit)
            .await?
            .into())
    }

    async fn favourited_by(
        &self,
        instance: &str,
        status_id: &str,
        limit: u32,
    ) -> FetchResult<Page<Value>> {
        Ok(self
            .client(instance)?
            .favourited_by(status_id, limit)
            .await?
            .into())
    }

    async fn context(
        &self,
        instance: &str,
        status_id: &str,
    ) -> FetchResult<(Vec<Value>, Vec<Value>)> {
        Ok(self.client(instance)?.context(status_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clients_are_cached_per_instance() {
        let source = MastodonSource::new(
            CrawlSettings::default(),
            Credentials::empty().with_token("a.example", "t"),
        );
        let first = source.client("A.example").unwrap();
        let second = source.client("a.example").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &source.client("b.example").unwrap()));
    }

    #[test]
    fn bad_instance_names_are_unreachable() {
        let source = MastodonSource::new(CrawlSettings::default(), Credentials::empty());
        assert!(matches!(source.client(" "), Err(SourceFailure::Unreachable(_))));
    }
}
