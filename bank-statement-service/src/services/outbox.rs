//! Transactional outbox used as the notification channel.
//!
//! Events are written to `outbox_events`; a relay outside this service
//! forwards them to the message broker.

use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::stores::NotificationDispatcher;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct OutboxNotifier {
    pool: PgPool,
}

impl OutboxNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationDispatcher for OutboxNotifier {
    #[instrument(skip(self, payload), fields(topic = %topic))]
    async fn dispatch(&self, topic: &str, payload: serde_json::Value) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_outbox_event"])
            .start_timer();

        let event_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO outbox_events (event_id, topic, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(event_id)
        .bind(topic)
        .bind(sqlx::types::Json(payload))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to write outbox event: {}", e)))?;

        timer.observe_duration();
        debug!(event_id = %event_id, "Outbox event written");
        Ok(())
    }
}
