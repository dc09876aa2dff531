use super::schema::Database;
use super::types::{require_user_and_url, StoreError};

impl Database {
    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// List a user's subscribed URLs in subscription order.
    ///
    /// Unknown users yield an empty list, never an error.
    pub async fn list_urls(&self, user: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT url FROM {table} WHERE user_id = ? ORDER BY rowid",
            table = self.table
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    /// Subscribe `user` to `url`. Re-subscribing keeps the original row.
    pub async fn add_url(&self, user: &str, url: &str) -> Result<(), StoreError> {
        require_user_and_url(user, url)?;

        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(&format!(
            "INSERT INTO {table} (user_id, url, subscribed_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id, url) DO NOTHING",
            table = self.table
        ))
        .bind(user)
        .bind(url)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(user = %user, url = %url, "Already subscribed");
        }
        Ok(())
    }

    /// Unsubscribe `user` from `url`. Missing rows are not an error.
    pub async fn remove_url(&self, user: &str, url: &str) -> Result<(), StoreError> {
        require_user_and_url(user, url)?;

        let result = sqlx::query(&format!(
            "DELETE FROM {table} WHERE user_id = ? AND url = ?",
            table = self.table
        ))
        .bind(user)
        .bind(url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(user = %user, url = %url, "Unsubscribe of absent subscription ignored");
        }
        Ok(())
    }
}
