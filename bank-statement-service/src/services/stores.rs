//! Persistence and collaborator seams used by the import pipeline.

use crate::models::{
    AvailabilityAccount, BankIdentity, BankStatement, LedgerRecord, LedgerRecordFilter,
    LedgerRecordStatus, ReconciliationStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

/// Filters for listing statements. Always scoped to one church.
#[derive(Debug, Clone, Default)]
pub struct StatementFilter {
    pub church_id: String,
    pub bank_id: Option<String>,
    pub availability_account_id: Option<String>,
    pub status: Option<ReconciliationStatus>,
    pub month: Option<i32>,
    pub year: Option<i32>,
    pub posted_from: Option<DateTime<Utc>>,
    pub posted_until: Option<DateTime<Utc>>,
}

impl StatementFilter {
    pub fn for_church(church_id: impl Into<String>) -> Self {
        Self {
            church_id: church_id.into(),
            ..Default::default()
        }
    }

    pub fn matches(&self, statement: &BankStatement) -> bool {
        statement.church_id == self.church_id
            && self
                .bank_id
                .as_ref()
                .is_none_or(|id| *id == statement.bank.bank_id)
            && self
                .availability_account_id
                .as_ref()
                .is_none_or(|id| *id == statement.availability_account.availability_account_id)
            && self.status.is_none_or(|s| s == statement.status())
            && self.month.is_none_or(|m| m == statement.month)
            && self.year.is_none_or(|y| y == statement.year)
            && self.posted_from.is_none_or(|from| statement.posted_at >= from)
            && self.posted_until.is_none_or(|until| statement.posted_at < until)
    }
}

/// Persistence for bank statements.
///
/// Dedup lookups are scoped to `(church_id, bank_id)`.
#[async_trait]
pub trait StatementStore: Send + Sync {
    async fn exists_by_fit_id(
        &self,
        church_id: &str,
        bank_id: &str,
        fit_id: &str,
    ) -> Result<bool, AppError>;

    async fn exists_by_hash(
        &self,
        church_id: &str,
        bank_id: &str,
        hash: &str,
    ) -> Result<bool, AppError>;

    /// Insert all statements, silently skipping rows that collide with an
    /// existing dedup key. Returns the ids that were actually inserted.
    async fn insert_many(&self, statements: &[BankStatement]) -> Result<Vec<Uuid>, AppError>;

    async fn find_by_id(
        &self,
        church_id: &str,
        bank_statement_id: Uuid,
    ) -> Result<Option<BankStatement>, AppError>;

    /// Persist the statement's reconciliation status, record id and timestamp.
    async fn update_reconciliation(&self, statement: &BankStatement) -> Result<(), AppError>;

    async fn list(
        &self,
        filter: &StatementFilter,
        page_size: i32,
        page_token: Option<Uuid>,
    ) -> Result<(Vec<BankStatement>, Option<String>), AppError>;
}

/// Read/update access to the church ledger.
#[async_trait]
pub trait LedgerRecordStore: Send + Sync {
    /// First record matching every condition of `filter`, earliest date first,
    /// then lowest id. Records already bound to a reconciled statement are skipped.
    async fn find_one(&self, filter: &LedgerRecordFilter) -> Result<Option<LedgerRecord>, AppError>;

    async fn find_by_id(
        &self,
        church_id: &str,
        financial_record_id: &str,
    ) -> Result<Option<LedgerRecord>, AppError>;

    async fn dispatch_status_update(
        &self,
        record: &LedgerRecord,
        status: LedgerRecordStatus,
    ) -> Result<(), AppError>;
}

/// Read-only bank registry.
#[async_trait]
pub trait BankDirectory: Send + Sync {
    async fn find_bank(&self, bank_id: &str) -> Result<Option<BankIdentity>, AppError>;

    async fn find_availability_account(
        &self,
        church_id: &str,
        availability_account_id: &str,
    ) -> Result<Option<AvailabilityAccount>, AppError>;
}

/// One-way message channel. No acknowledgement beyond the send itself.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, topic: &str, payload: serde_json::Value) -> Result<(), AppError>;
}
