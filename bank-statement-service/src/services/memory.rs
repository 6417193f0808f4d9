//! In-process implementations of the store traits, used by tests and local runs
//! without a database.

use crate::models::{
    AvailabilityAccount, BankIdentity, BankStatement, LedgerRecord, LedgerRecordFilter,
    LedgerRecordStatus,
};
use crate::services::stores::{
    BankDirectory, LedgerRecordStore, NotificationDispatcher, StatementFilter, StatementStore,
};
use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

fn poisoned(what: &str, e: impl std::fmt::Display) -> AppError {
    AppError::InternalError(anyhow::anyhow!("{} mutex poisoned: {}", what, e))
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Default)]
pub struct InMemoryStatementStore {
    statements: Mutex<Vec<BankStatement>>,
}

impl InMemoryStatementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored statement in insertion order.
    pub fn all(&self) -> Result<Vec<BankStatement>, AppError> {
        Ok(self
            .statements
            .lock()
            .map_err(|e| poisoned("Statement store", e))?
            .clone())
    }

    fn collides(existing: &BankStatement, candidate: &BankStatement) -> bool {
        existing.church_id == candidate.church_id
            && existing.bank.bank_id == candidate.bank.bank_id
            && ((candidate.has_fit_id() && existing.fit_id == candidate.fit_id)
                || existing.hash == candidate.hash)
    }
}

#[async_trait]
impl StatementStore for InMemoryStatementStore {
    async fn exists_by_fit_id(
        &self,
        church_id: &str,
        bank_id: &str,
        fit_id: &str,
    ) -> Result<bool, AppError> {
        if fit_id.is_empty() {
            return Ok(false);
        }
        let statements = self
            .statements
            .lock()
            .map_err(|e| poisoned("Statement store", e))?;
        Ok(statements
            .iter()
            .any(|s| s.church_id == church_id && s.bank.bank_id == bank_id && s.fit_id == fit_id))
    }

    async fn exists_by_hash(
        &self,
        church_id: &str,
        bank_id: &str,
        hash: &str,
    ) -> Result<bool, AppError> {
        let statements = self
            .statements
            .lock()
            .map_err(|e| poisoned("Statement store", e))?;
        Ok(statements
            .iter()
            .any(|s| s.church_id == church_id && s.bank.bank_id == bank_id && s.hash == hash))
    }

    async fn insert_many(&self, statements: &[BankStatement]) -> Result<Vec<Uuid>, AppError> {
        let mut stored = self
            .statements
            .lock()
            .map_err(|e| poisoned("Statement store", e))?;

        let mut inserted = Vec::new();
        for candidate in statements {
            if stored.iter().any(|s| Self::collides(s, candidate)) {
                continue;
            }
            stored.push(candidate.clone());
            inserted.push(candidate.bank_statement_id);
        }
        Ok(inserted)
    }

    async fn find_by_id(
        &self,
        church_id: &str,
        bank_statement_id: Uuid,
    ) -> Result<Option<BankStatement>, AppError> {
        let statements = self
            .statements
            .lock()
            .map_err(|e| poisoned("Statement store", e))?;
        Ok(statements
            .iter()
            .find(|s| s.church_id == church_id && s.bank_statement_id == bank_statement_id)
            .cloned())
    }

    async fn update_reconciliation(&self, statement: &BankStatement) -> Result<(), AppError> {
        let mut statements = self
            .statements
            .lock()
            .map_err(|e| poisoned("Statement store", e))?;
        let stored = statements
            .iter_mut()
            .find(|s| {
                s.church_id == statement.church_id
                    && s.bank_statement_id == statement.bank_statement_id
            })
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Bank statement {} not found",
                    statement.bank_statement_id
                ))
            })?;
        *stored = statement.clone();
        Ok(())
    }

    async fn list(
        &self,
        filter: &StatementFilter,
        page_size: i32,
        page_token: Option<Uuid>,
    ) -> Result<(Vec<BankStatement>, Option<String>), AppError> {
        let limit = page_size.clamp(1, 100) as usize;
        let statements = self
            .statements
            .lock()
            .map_err(|e| poisoned("Statement store", e))?;

        let cursor = page_token
            .and_then(|id| statements.iter().find(|s| s.bank_statement_id == id))
            .map(|s| (s.posted_at, s.bank_statement_id));

        let mut page: Vec<BankStatement> = statements
            .iter()
            .filter(|s| filter.matches(s))
            .filter(|s| cursor.is_none_or(|c| (s.posted_at, s.bank_statement_id) > c))
            .cloned()
            .collect();
        page.sort_by_key(|s| (s.posted_at, s.bank_statement_id));

        let has_more = page.len() > limit;
        page.truncate(limit);
        let next_token = if has_more {
            page.last().map(|s| s.bank_statement_id.to_string())
        } else {
            None
        };

        Ok((page, next_token))
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Default)]
pub struct InMemoryLedgerStore {
    records: Mutex<Vec<LedgerRecord>>,
    status_updates: Mutex<Vec<(String, LedgerRecordStatus)>>,
    find_one_calls: AtomicU64,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<LedgerRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn insert(&self, record: LedgerRecord) -> Result<(), AppError> {
        self.records
            .lock()
            .map_err(|e| poisoned("Ledger store", e))?
            .push(record);
        Ok(())
    }

    /// Status update events dispatched so far, as `(financial_record_id, status)`.
    pub fn status_updates(&self) -> Result<Vec<(String, LedgerRecordStatus)>, AppError> {
        Ok(self
            .status_updates
            .lock()
            .map_err(|e| poisoned("Ledger events", e))?
            .clone())
    }

    /// Number of filter queries run against the ledger.
    pub fn find_one_calls(&self) -> u64 {
        self.find_one_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerRecordStore for InMemoryLedgerStore {
    async fn find_one(&self, filter: &LedgerRecordFilter) -> Result<Option<LedgerRecord>, AppError> {
        self.find_one_calls.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().map_err(|e| poisoned("Ledger store", e))?;
        Ok(records
            .iter()
            .filter(|r| filter.matches(r))
            .min_by(|a, b| {
                a.date
                    .cmp(&b.date)
                    .then_with(|| a.financial_record_id.cmp(&b.financial_record_id))
            })
            .cloned())
    }

    async fn find_by_id(
        &self,
        church_id: &str,
        financial_record_id: &str,
    ) -> Result<Option<LedgerRecord>, AppError> {
        let records = self.records.lock().map_err(|e| poisoned("Ledger store", e))?;
        Ok(records
            .iter()
            .find(|r| r.church_id == church_id && r.financial_record_id == financial_record_id)
            .cloned())
    }

    async fn dispatch_status_update(
        &self,
        record: &LedgerRecord,
        status: LedgerRecordStatus,
    ) -> Result<(), AppError> {
        self.status_updates
            .lock()
            .map_err(|e| poisoned("Ledger events", e))?
            .push((record.financial_record_id.clone(), status));

        // Applied immediately, as the ledger consumer would.
        let mut records = self.records.lock().map_err(|e| poisoned("Ledger store", e))?;
        if let Some(stored) = records.iter_mut().find(|r| {
            r.church_id == record.church_id && r.financial_record_id == record.financial_record_id
        }) {
            stored.status = status;
        }
        Ok(())
    }
}

// ============================================================================
// Bank directory
// ============================================================================

#[derive(Default)]
pub struct InMemoryBankDirectory {
    banks: HashMap<String, BankIdentity>,
    accounts: HashMap<String, AvailabilityAccount>,
}

impl InMemoryBankDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bank(mut self, bank: BankIdentity) -> Self {
        self.banks.insert(bank.bank_id.clone(), bank);
        self
    }

    pub fn with_account(mut self, account: AvailabilityAccount) -> Self {
        self.accounts
            .insert(account.availability_account_id.clone(), account);
        self
    }
}

#[async_trait]
impl BankDirectory for InMemoryBankDirectory {
    async fn find_bank(&self, bank_id: &str) -> Result<Option<BankIdentity>, AppError> {
        Ok(self.banks.get(bank_id).cloned())
    }

    async fn find_availability_account(
        &self,
        church_id: &str,
        availability_account_id: &str,
    ) -> Result<Option<AvailabilityAccount>, AppError> {
        Ok(self
            .accounts
            .get(availability_account_id)
            .filter(|a| a.church_id == church_id)
            .cloned())
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Forwards every dispatched notification onto an unbounded channel.
pub struct ChannelNotifier {
    enabled: bool,
    sender: mpsc::UnboundedSender<Notification>,
    send_count: AtomicU64,
}

impl ChannelNotifier {
    /// A disabled notifier rejects every dispatch.
    pub fn with_enabled(enabled: bool) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let notifier = Self {
            enabled,
            sender,
            send_count: AtomicU64::new(0),
        };
        (notifier, receiver)
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationDispatcher for ChannelNotifier {
    async fn dispatch(&self, topic: &str, payload: serde_json::Value) -> Result<(), AppError> {
        if !self.enabled {
            return Err(AppError::ServiceUnavailable);
        }

        self.sender
            .send(Notification {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Notification channel closed: {}", e)))?;
        self.send_count.fetch_add(1, Ordering::SeqCst);

        tracing::info!(topic = %topic, "[MOCK] Notification dispatched");
        Ok(())
    }
}
