//! Utility functions shared by the store, the aggregator and OPML import.

mod url_validator;

pub use url_validator::{validate_feed_url, UrlValidationError};
