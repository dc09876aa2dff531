//! Subscription storage: who is subscribed to which feed URLs.
//!
//! Two interchangeable backends sit behind [`SubscriptionStore`]:
//!
//! - [`MemoryStore`] - volatile, in-process, per-user locking
//! - [`Database`] - durable, SQLite via `sqlx`, one row per (user, url)
//!
//! The variant is chosen once from [`StoreConfig`] and never changes for the
//! life of the store.

mod memory;
mod schema;
mod subscriptions;
mod types;

pub use memory::MemoryStore;
pub use schema::Database;
pub use types::{StoreBackend, StoreError};
pub(crate) use types::require_user_and_url;

use crate::config::StoreConfig;

/// A user → feed URL mapping with list/add/remove capabilities.
#[derive(Clone)]
pub enum SubscriptionStore {
    Volatile(MemoryStore),
    Durable(Database),
}

impl SubscriptionStore {
    /// Build the backend named in the configuration.
    pub async fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        match config.backend {
            StoreBackend::Volatile => Ok(Self::Volatile(MemoryStore::new())),
            StoreBackend::Durable => {
                let db =
                    Database::open(&config.database, &config.table, config.max_connections).await?;
                Ok(Self::Durable(db))
            }
        }
    }

    pub fn backend(&self) -> StoreBackend {
        match self {
            Self::Volatile(_) => StoreBackend::Volatile,
            Self::Durable(_) => StoreBackend::Durable,
        }
    }

    pub async fn list_urls(&self, user: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Volatile(store) => store.list_urls(user),
            Self::Durable(db) => db.list_urls(user).await,
        }
    }

    pub async fn add(&self, user: &str, url: &str) -> Result<(), StoreError> {
        match self {
            Self::Volatile(store) => store.add_url(user, url),
            Self::Durable(db) => db.add_url(user, url).await,
        }
    }

    pub async fn remove(&self, user: &str, url: &str) -> Result<(), StoreError> {
        match self {
            Self::Volatile(store) => store.remove_url(user, url),
            Self::Durable(db) => db.remove_url(user, url).await,
        }
    }

    /// Whether the store was set up and can serve requests in principle.
    pub fn is_initialized(&self) -> bool {
        match self {
            Self::Volatile(_) => true,
            Self::Durable(db) => db.is_initialized(),
        }
    }
}
