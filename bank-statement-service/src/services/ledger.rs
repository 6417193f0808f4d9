//! Postgres access to the church ledger (`financial_records`).
//!
//! Reads go straight to the ledger tables; status changes are requested
//! through an event so the ledger owns its own writes.

use crate::models::{LedgerRecord, LedgerRecordFilter, LedgerRecordRow, LedgerRecordStatus};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::stores::{LedgerRecordStore, NotificationDispatcher};
use async_trait::async_trait;
use serde_json::json;
use service_core::error::AppError;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct PgLedgerRecordStore {
    pool: PgPool,
    events: Arc<dyn NotificationDispatcher>,
    status_topic: String,
}

impl PgLedgerRecordStore {
    pub fn new(
        pool: PgPool,
        events: Arc<dyn NotificationDispatcher>,
        status_topic: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            events,
            status_topic: status_topic.into(),
        }
    }
}

#[async_trait]
impl LedgerRecordStore for PgLedgerRecordStore {
    /// Records already bound to a reconciled statement are never candidates,
    /// even while the ledger has not yet applied the status event.
    #[instrument(skip(self, filter), fields(church_id = %filter.church_id, amount = %filter.amount))]
    async fn find_one(&self, filter: &LedgerRecordFilter) -> Result<Option<LedgerRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_financial_record"])
            .start_timer();

        let row = sqlx::query_as::<_, LedgerRecordRow>(
            r#"
            SELECT fr.financial_record_id, fr.church_id, fr.amount, fr.date, fr.type AS record_type,
                   fr.status, fr.availability_account_id
            FROM financial_records fr
            WHERE fr.church_id = $1
              AND fr.amount = $2
              AND fr.date >= $3 AND fr.date < $4
              AND fr.type = ANY($5)
              AND fr.status = ANY($6)
              AND fr.availability_account_id = $7
              AND NOT EXISTS (
                  SELECT 1 FROM bank_statements bs
                  WHERE bs.church_id = fr.church_id
                    AND bs.financial_record_id = fr.financial_record_id
                    AND bs.reconciliation_status = 'RECONCILED'
              )
            ORDER BY fr.date, fr.financial_record_id
            LIMIT 1
            "#,
        )
        .bind(&filter.church_id)
        .bind(filter.amount)
        .bind(filter.date_from)
        .bind(filter.date_until)
        .bind(filter.record_type_strs())
        .bind(filter.status_strs())
        .bind(&filter.availability_account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to query financial records: {}", e))
        })?;

        timer.observe_duration();

        row.map(LedgerRecord::try_from).transpose()
    }

    #[instrument(skip(self), fields(church_id = %church_id, financial_record_id = %financial_record_id))]
    async fn find_by_id(
        &self,
        church_id: &str,
        financial_record_id: &str,
    ) -> Result<Option<LedgerRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_financial_record"])
            .start_timer();

        let row = sqlx::query_as::<_, LedgerRecordRow>(
            r#"
            SELECT financial_record_id, church_id, amount, date, type AS record_type, status, availability_account_id
            FROM financial_records
            WHERE church_id = $1 AND financial_record_id = $2
            "#,
        )
        .bind(church_id)
        .bind(financial_record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get financial record: {}", e))
        })?;

        timer.observe_duration();

        row.map(LedgerRecord::try_from).transpose()
    }

    #[instrument(skip(self, record), fields(financial_record_id = %record.financial_record_id, status = status.as_str()))]
    async fn dispatch_status_update(
        &self,
        record: &LedgerRecord,
        status: LedgerRecordStatus,
    ) -> Result<(), AppError> {
        let payload = json!({
            "churchId": record.church_id,
            "financialRecordId": record.financial_record_id,
            "status": status,
        });
        self.events.dispatch(&self.status_topic, payload).await?;

        info!("Financial record status update dispatched");
        Ok(())
    }
}
