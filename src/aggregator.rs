use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::feed::{parse_feed, read_opml, Feed, FeedFetcher, OpmlError, ResourceGroup};
use crate::storage::{require_user_and_url, StoreError, SubscriptionStore};
use crate::util::validate_feed_url;

use std::path::Path;
use std::sync::Arc;

/// A user's aggregated view: every subscribed feed that currently has items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriptions {
    pub user: String,
    pub feeds: Vec<Feed>,
}

/// Failures while wiring up an [`Aggregator`] at startup.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Outcome of an OPML import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Feed URLs found in the file.
    pub found: usize,
    pub subscribed: usize,
}

/// Status payload for health checks and mutation replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: u16,
}

impl Health {
    pub const OK: Health = Health { status: 200 };
    pub const ERROR: Health = Health { status: 500 };

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Composition root: owns one subscription store and one feed fetcher.
#[derive(Clone)]
pub struct Aggregator {
    store: SubscriptionStore,
    fetcher: FeedFetcher,
}

impl Aggregator {
    pub fn new(store: SubscriptionStore, fetcher: FeedFetcher) -> Self {
        Self { store, fetcher }
    }

    /// Wire up the store, the fetch resource group and the HTTP client from
    /// configuration.
    pub async fn from_config(config: &Config) -> Result<Self, SetupError> {
        let store = SubscriptionStore::from_config(&config.store).await?;
        let group = Arc::new(ResourceGroup::from_config(&config.fetch, &config.breaker));
        let client = FeedFetcher::build_client(&config.fetch)?;
        let fetcher = FeedFetcher::new(client, group, &config.fetch);

        tracing::info!(
            backend = %store.backend(),
            group = %config.fetch.group,
            workers = config.fetch.worker_pool_size,
            "Aggregator ready"
        );
        Ok(Self::new(store, fetcher))
    }

    pub fn store(&self) -> &SubscriptionStore {
        &self.store
    }

    pub fn fetcher(&self) -> &FeedFetcher {
        &self.fetcher
    }

    /// Fetch and parse every feed `user` subscribes to.
    ///
    /// Feeds are fetched concurrently, at most one per worker in the fetch
    /// group, and returned in the order the store lists them. A feed that
    /// fails in any way, or simply has no items, is left out. Only a store
    /// failure fails the whole call.
    pub async fn get_subscriptions(&self, user: &str) -> Result<Subscriptions, StoreError> {
        let urls = self.store.list_urls(user).await?;
        let total = urls.len();
        let concurrency = self.fetcher.group().pool_size();

        let feeds: Vec<Feed> = stream::iter(urls)
            .map(|url| async move {
                let body = self.fetcher.fetch(&url).await;
                parse_feed(&url, &body)
            })
            .buffered(concurrency)
            .filter(|feed| std::future::ready(feed.has_items()))
            .collect()
            .await;

        tracing::debug!(
            user = %user,
            subscribed = total,
            with_items = feeds.len(),
            "Aggregated subscriptions"
        );

        Ok(Subscriptions {
            user: user.to_string(),
            feeds,
        })
    }

    /// Subscribe `user` to `url`. Subscribing twice is a no-op.
    pub async fn add_subscription(&self, user: &str, url: &str) -> Result<(), StoreError> {
        let url = checked_url(user, url)?;
        self.store.add(user, url).await?;
        tracing::info!(user = %user, url = %url, "Subscribed");
        Ok(())
    }

    /// Unsubscribe `user` from `url`. Removing an absent subscription is a
    /// no-op.
    pub async fn delete_subscription(&self, user: &str, url: &str) -> Result<(), StoreError> {
        let url = checked_url(user, url)?;
        self.store.remove(user, url).await?;
        tracing::info!(user = %user, url = %url, "Unsubscribed");
        Ok(())
    }

    /// Subscribe `user` to every feed listed in an OPML file.
    ///
    /// An unreadable or malformed file fails the import. Individual feeds the
    /// store refuses are skipped with a warning.
    pub async fn import_opml(&self, user: &str, path: &Path) -> Result<ImportSummary, OpmlError> {
        let urls = read_opml(path).await?;
        let mut subscribed = 0;
        for url in &urls {
            match self.add_subscription(user, url).await {
                Ok(()) => subscribed += 1,
                Err(e) => {
                    tracing::warn!(user = %user, url = %url, error = %e, "Skipping feed from OPML");
                }
            }
        }
        Ok(ImportSummary {
            found: urls.len(),
            subscribed,
        })
    }

    pub fn health(&self) -> Health {
        if self.store.is_initialized() {
            Health::OK
        } else {
            Health::ERROR
        }
    }
}

fn checked_url<'a>(user: &str, url: &'a str) -> Result<&'a str, StoreError> {
    let url = url.trim();
    require_user_and_url(user, url)?;
    validate_feed_url(url).map_err(|e| StoreError::validation(e.to_string()))?;
    Ok(url)
}
