//! Per-user feed subscriptions with a resilient fetch-and-aggregate engine.
//!
//! An [`Aggregator`](aggregator::Aggregator) owns a
//! [`SubscriptionStore`](storage::SubscriptionStore) and a
//! [`FeedFetcher`](feed::FeedFetcher). Reading a user's subscriptions fans
//! out one fetch per feed inside an isolated worker pool guarded by a
//! circuit breaker; any feed that times out, fails, or does not parse is
//! silently left out of the result.

pub mod aggregator;
pub mod config;
pub mod feed;
pub mod storage;
pub mod util;

pub use aggregator::{Aggregator, Health, ImportSummary, SetupError, Subscriptions};
pub use config::Config;
