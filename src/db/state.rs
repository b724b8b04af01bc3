//! Runtime state tracking: shutdown detection and queue snapshots.

use crate::error::DatabaseError;
use crate::queue::QueueSnapshot;
use crate::{Error, Result};

use super::Database;

const QUEUE_SNAPSHOT_KEY: &str = "queue_snapshot";

impl Database {
    /// Check if the last shutdown was unclean
    ///
    /// Returns true if the previous session did not call set_clean_shutdown(),
    /// indicating a crash or forced termination. Hosts call this on startup to decide
    /// whether to look for interrupted batches.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value = self.get_runtime_value("clean_shutdown").await?;

        // Missing or "false" means the previous session never finished cleanly
        Ok(value.is_none_or(|v| v != "true"))
    }

    /// Mark that the application has started
    ///
    /// If set_clean_shutdown() is not called before the next startup,
    /// was_unclean_shutdown() will return true.
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_runtime_value("clean_shutdown", "false").await
    }

    /// Mark that the application is shutting down cleanly
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_runtime_value("clean_shutdown", "true").await
    }

    /// Persist a queue snapshot, replacing any previous one
    pub async fn save_queue_snapshot(&self, snapshot: &QueueSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.set_runtime_value(QUEUE_SNAPSHOT_KEY, &json).await?;
        tracing::debug!(
            items = snapshot.items.len(),
            in_flight = snapshot.in_flight.len(),
            "Saved queue snapshot"
        );
        Ok(())
    }

    /// Load the last saved queue snapshot
    ///
    /// Returns `None` if no snapshot was saved or the stored one cannot be parsed.
    pub async fn load_queue_snapshot(&self) -> Result<Option<QueueSnapshot>> {
        let Some(json) = self.get_runtime_value(QUEUE_SNAPSHOT_KEY).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                tracing::warn!(error = %e, "Stored queue snapshot is corrupt, ignoring");
                Ok(None)
            }
        }
    }

    /// Remove the saved queue snapshot
    pub async fn clear_queue_snapshot(&self) -> Result<()> {
        sqlx::query("DELETE FROM runtime_state WHERE key = ?")
            .bind(QUEUE_SNAPSHOT_KEY)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear queue snapshot: {}",
                    e
                )))
            })?;

        Ok(())
    }

    async fn get_runtime_value(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to read runtime state '{}': {}",
                        key, e
                    )))
                })?;

        Ok(value)
    }

    async fn set_runtime_value(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write runtime state '{}': {}",
                key, e
            )))
        })?;

        Ok(())
    }
}
