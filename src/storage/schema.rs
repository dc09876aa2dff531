use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::types::StoreError;

// ============================================================================
// Database
// ============================================================================

/// Durable subscription store backed by SQLite.
///
/// Each (user, url) pair is one row; a user's subscription set is the rows
/// sharing a `user_id`. The `subscribed_at` column is informational only,
/// presence of the row is what makes a URL subscribed.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) table: Arc<str>,
}

impl Database {
    /// Open a connection pool and make sure the subscriptions table exists.
    ///
    /// `":memory:"` is accepted for tests; it is pinned to a single
    /// long-lived connection since every SQLite memory connection is its own
    /// database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Validation` if `table` is not a plain identifier
    /// and `StoreError::Unavailable` if the database cannot be opened or
    /// migrated.
    pub async fn open(path: &str, table: &str, max_connections: u32) -> Result<Self, StoreError> {
        validate_table_name(table)?;

        let url = format!("sqlite:{}?mode=rwc", path);
        // busy_timeout=5000: wait up to 5s on lock contention instead of failing with SQLITE_BUSY
        let options = SqliteConnectOptions::from_str(&url)?.pragma("busy_timeout", "5000");

        let in_memory = path == ":memory:";
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections.max(1) })
            .acquire_timeout(Duration::from_secs(10));
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        let db = Self {
            pool,
            table: Arc::from(table),
        };
        db.migrate().await?;

        tracing::info!(path = %path, table = %table, "Opened durable subscription store");
        Ok(db)
    }

    /// Create the subscriptions table and its user index. Idempotent.
    async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                user_id TEXT NOT NULL,
                url TEXT NOT NULL,
                subscribed_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, url)
            )
        "#,
            table = self.table
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_user ON {table}(user_id)",
            table = self.table
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// True while the pool is open. Not a connectivity probe.
    pub fn is_initialized(&self) -> bool {
        !self.pool.is_closed()
    }

    /// Close every pooled connection. Subsequent queries fail with
    /// `StoreError::Unavailable`.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StoreError::validation(format!(
            "invalid table name '{}': expected [A-Za-z_][A-Za-z0-9_]*",
            table
        )))
    }
}
