use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by the subscription store and the mutation paths above it.
///
/// Only these errors ever cross the aggregator boundary. Fetch and parse
/// problems are absorbed below it and never show up here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Caller supplied an empty user, an empty or malformed URL, or an
    /// unusable backend identifier.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The durable backend could not be reached or the query failed.
    #[error("Subscription store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    /// A volatile store lock was poisoned by a panicking writer.
    #[error("Subscription store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }
}

/// Rejects empty user ids and empty URLs, the shared precondition for every
/// store mutation.
pub(crate) fn require_user_and_url(user: &str, url: &str) -> Result<(), StoreError> {
    if user.trim().is_empty() {
        return Err(StoreError::validation("user id must not be empty"));
    }
    if url.trim().is_empty() {
        return Err(StoreError::validation("feed url must not be empty"));
    }
    Ok(())
}

// ============================================================================
// Backend Selection
// ============================================================================

/// Which store variant to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map, lost on exit.
    #[default]
    Volatile,
    /// SQLite-backed table, survives restarts.
    Durable,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Volatile => f.write_str("volatile"),
            StoreBackend::Durable => f.write_str("durable"),
        }
    }
}
