use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// A message document as stored in the messages table
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MessageDocument {
    /// Store-assigned message identifier
    pub id: String,
    /// Document fields, including `base64Payload` and (once processed)
    /// `decoded`
    pub fields: serde_json::Value,
    /// When the document was created
    pub created_at: DateTime<Utc>,
}

/// Completion marking for processed messages.
///
/// Mockable seam so pipeline tests can observe (or fail) the marking step
/// without a database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Record that the message's payload has been decoded and uploaded.
    /// Must be a merge-style update: only the `decoded` flag changes,
    /// all other fields are preserved. Idempotent.
    async fn mark_decoded(&self, message_id: &str) -> Result<()>;
}

/// PostgreSQL-backed document store for message records
pub struct DocumentStore {
    pool: PgPool,
}

impl DocumentStore {
    /// Create a new document store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Fetch a message document by id
    pub async fn fetch_message(&self, message_id: &str) -> Result<Option<MessageDocument>> {
        let message = sqlx::query_as::<_, MessageDocument>(
            r#"
            SELECT id, fields, created_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query message")?;

        Ok(message)
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for DocumentStore {
    #[instrument(skip(self), fields(message_id = %message_id))]
    async fn mark_decoded(&self, message_id: &str) -> Result<()> {
        // JSONB concatenation merges the flag into the existing fields,
        // leaving everything else untouched. Setting `decoded` twice is
        // equivalent to setting it once.
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET fields = fields || '{"decoded": true}'::jsonb
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .execute(&self.pool)
        .await
        .context("Failed to mark message as decoded")?;

        if result.rows_affected() == 0 {
            // The upload already happened; a missing document is worth a
            // warning but retrying the event would not bring it back.
            warn!(message_id = %message_id, "Message document not found when marking decoded");
        } else {
            debug!(message_id = %message_id, "Message marked as decoded");
        }

        Ok(())
    }
}
