//! Business operations over bank statements: import requests, retry,
//! manual linking and listing.

use crate::models::{BankStatement, LedgerRecordStatus};
use crate::parsers::ParserRegistry;
use crate::services::metrics::{record_error, record_reconciliation};
use crate::services::reconciler::{ReconcileOutcome, Reconciler};
use crate::services::stores::{BankDirectory, LedgerRecordStore, StatementFilter, StatementStore};
use crate::workers::{ImportJobPayload, ImportQueue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct ImportBankStatementRequest {
    pub church_id: String,
    pub bank_id: String,
    pub month: i32,
    pub year: i32,
    pub uploaded_by: String,
    /// Local path (or object URL) of the uploaded file.
    pub file_location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportAccepted {
    pub queued_at: DateTime<Utc>,
    pub file_path: String,
}

fn parse_statement_id(value: &str) -> Result<Uuid, AppError> {
    Uuid::from_str(value)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid bank_statement_id")))
}

#[derive(Clone)]
pub struct BankStatementService {
    statements: Arc<dyn StatementStore>,
    ledger: Arc<dyn LedgerRecordStore>,
    banks: Arc<dyn BankDirectory>,
    registry: Arc<ParserRegistry>,
    reconciler: Reconciler,
    queue: ImportQueue,
}

impl BankStatementService {
    pub fn new(
        statements: Arc<dyn StatementStore>,
        ledger: Arc<dyn LedgerRecordStore>,
        banks: Arc<dyn BankDirectory>,
        registry: Arc<ParserRegistry>,
        queue: ImportQueue,
    ) -> Self {
        let reconciler = Reconciler::new(statements.clone(), ledger.clone());
        Self {
            statements,
            ledger,
            banks,
            registry,
            reconciler,
            queue,
        }
    }

    /// Validate an upload and queue it for import. Parsing happens in the worker.
    #[instrument(skip(self, request), fields(church_id = %request.church_id, bank_id = %request.bank_id))]
    pub async fn import_bank_statement(
        &self,
        request: ImportBankStatementRequest,
    ) -> Result<ImportAccepted, AppError> {
        if !(1..=12).contains(&request.month) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid month: {}",
                request.month
            )));
        }

        let bank = self
            .banks
            .find_bank(&request.bank_id)
            .await?
            .filter(|b| b.church_id == request.church_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Bank {} not found", request.bank_id))
            })?;

        let account_id = bank.availability_account_id.clone().ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "Bank {} has no availability account",
                bank.name
            ))
        })?;
        let availability_account = self
            .banks
            .find_availability_account(&request.church_id, &account_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Availability account {} not found",
                    account_id
                ))
            })?;

        if !self.registry.is_supported(&bank.name) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "No parser for bank {}",
                bank.name
            )));
        }

        let queued_at = Utc::now();
        self.queue.enqueue(ImportJobPayload {
            church_id: request.church_id,
            bank,
            availability_account,
            month: request.month,
            year: request.year,
            file_location: request.file_location.clone(),
            uploaded_by: request.uploaded_by,
            queued_at,
        })?;

        info!(file = %request.file_location, "Bank statement import queued");

        Ok(ImportAccepted {
            queued_at,
            file_path: request.file_location,
        })
    }

    /// Re-run automatic matching for one statement, whatever its current state.
    #[instrument(skip(self), fields(church_id = %church_id, bank_statement_id = %bank_statement_id))]
    pub async fn retry_reconciliation(
        &self,
        church_id: &str,
        bank_statement_id: &str,
    ) -> Result<ReconcileOutcome, AppError> {
        let mut statement = self.fetch_statement(church_id, bank_statement_id).await?;

        let outcome = self.reconciler.reconcile(&mut statement).await?;
        record_reconciliation("retry", outcome.matched);

        Ok(outcome)
    }

    /// Bind a statement to a ledger record chosen by an operator. The
    /// automatic matching rules are not applied.
    #[instrument(skip(self), fields(church_id = %church_id, bank_statement_id = %bank_statement_id, financial_record_id = %financial_record_id))]
    pub async fn link_to_financial_record(
        &self,
        church_id: &str,
        bank_statement_id: &str,
        financial_record_id: &str,
    ) -> Result<BankStatement, AppError> {
        let mut statement = self.fetch_statement(church_id, bank_statement_id).await?;

        let record = self
            .ledger
            .find_by_id(church_id, financial_record_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Financial record {} not found",
                    financial_record_id
                ))
            })?;

        statement.mark_reconciled(record.financial_record_id.clone(), Utc::now());
        self.statements.update_reconciliation(&statement).await?;
        record_reconciliation("manual", true);

        if let Err(e) = self
            .ledger
            .dispatch_status_update(&record, LedgerRecordStatus::Reconciled)
            .await
        {
            record_error("ledger_status_dispatch");
            warn!(error = %e, "Failed to dispatch financial record status update");
        }

        info!("Statement linked to financial record");
        Ok(statement)
    }

    #[instrument(skip(self, filter), fields(church_id = %filter.church_id))]
    pub async fn list_bank_statements(
        &self,
        filter: &StatementFilter,
        page_size: i32,
        page_token: Option<&str>,
    ) -> Result<(Vec<BankStatement>, Option<String>), AppError> {
        let cursor = page_token
            .filter(|t| !t.is_empty())
            .map(|t| {
                Uuid::from_str(t)
                    .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid page_token")))
            })
            .transpose()?;

        self.statements.list(filter, page_size, cursor).await
    }

    async fn fetch_statement(
        &self,
        church_id: &str,
        bank_statement_id: &str,
    ) -> Result<BankStatement, AppError> {
        let id = parse_statement_id(bank_statement_id)?;
        self.statements
            .find_by_id(church_id, id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Bank statement {} not found", id))
            })
    }
}
