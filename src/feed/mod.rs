//! Feed retrieval and parsing.
//!
//! - [`fetcher`] - HTTP retrieval inside an isolated resource group, degrading
//!   every failure to an empty body
//! - [`group`] - bounded worker pool and wait queue for the fetch group
//! - [`breaker`] - rolling-window circuit breaker guarding the group
//! - [`parser`] - tolerant RSS/RDF/Atom reduction to [`Feed`]
//! - [`opml`] - subscription list import
//!
//! ```ignore
//! let body = fetcher.fetch(url).await;   // "" on any failure
//! let feed = parse_feed(url, &body);     // empty feed on any failure
//! ```

pub mod breaker;
mod fetcher;
mod group;
mod model;
mod opml;
mod parser;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, Clock, ManualClock, MonotonicClock};
pub use fetcher::{FeedFetcher, FetchError};
pub use group::ResourceGroup;
pub use model::{Feed, FeedItem};
pub use opml::{parse_opml, read_opml, OpmlError};
pub use parser::parse_feed;
