//! Common test utilities for bank-statement-service integration tests.
//!
//! Everything runs against the in-memory stores; no database is needed.

#![allow(dead_code)]

use bank_statement_service::config::ImportWorkerConfig;
use bank_statement_service::models::{
    AvailabilityAccount, BankIdentity, BankStatement, LedgerRecord, LedgerRecordStatus,
    LedgerRecordType,
};
use bank_statement_service::parsers::ParserRegistry;
use bank_statement_service::services::memory::{
    ChannelNotifier, InMemoryBankDirectory, InMemoryLedgerStore, InMemoryStatementStore,
    Notification,
};
use bank_statement_service::services::{
    BankDirectory, BankStatementService, LedgerRecordStore, NotificationDispatcher, Reconciler,
    StatementStore,
};
use bank_statement_service::workers::{ImportBankStatementJob, ImportJobPayload, ImportWorker};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub const CHURCH_ID: &str = "church-1";
pub const OTHER_CHURCH_ID: &str = "church-2";
pub const BANK_ID: &str = "bank-bb";
pub const UNSUPPORTED_BANK_ID: &str = "bank-unsupported";
pub const NO_ACCOUNT_BANK_ID: &str = "bank-no-account";
pub const OTHER_CHURCH_BANK_ID: &str = "bank-other-church";
pub const ACCOUNT_ID: &str = "acc-1";
pub const SUMMARY_TOPIC: &str = "bank-statement.import.completed";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,bank_statement_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn day(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

pub fn bank(bank_id: &str, church_id: &str, name: &str, account: Option<&str>) -> BankIdentity {
    BankIdentity {
        bank_id: bank_id.to_string(),
        church_id: church_id.to_string(),
        name: name.to_string(),
        tag: "CC".to_string(),
        availability_account_id: account.map(str::to_string),
    }
}

pub fn account() -> AvailabilityAccount {
    AvailabilityAccount {
        availability_account_id: ACCOUNT_ID.to_string(),
        church_id: CHURCH_ID.to_string(),
        account_name: "Conta Movimento".to_string(),
    }
}

/// An open ledger record on the test church's account.
pub fn ledger_record(
    id: &str,
    amount: Decimal,
    date: DateTime<Utc>,
    record_type: LedgerRecordType,
) -> LedgerRecord {
    LedgerRecord {
        financial_record_id: id.to_string(),
        church_id: CHURCH_ID.to_string(),
        amount,
        date,
        record_type,
        status: LedgerRecordStatus::Pending,
        availability_account_id: ACCOUNT_ID.to_string(),
    }
}

/// Banco do Brasil export with the given `(date, description, reference, amount)` rows,
/// framed by the opening and closing balance rows the bank always adds.
pub fn statement_csv(rows: &[(&str, &str, &str, &str)]) -> String {
    let mut csv = String::from(
        "\"Data\",\"Dependencia Origem\",\"Histórico\",\"Data do Balancete\",\"Número do documento\",\"Valor\",\n",
    );
    csv.push_str("\"30/04/2024\",\"\",\"Saldo Anterior\",\"\",\"0\",\"1.000,00\",\n");
    for (date, description, reference, amount) in rows {
        csv.push_str(&format!(
            "\"{}\",\"\",\"{}\",\"\",\"{}\",\"{}\",\n",
            date, description, reference, amount
        ));
    }
    csv.push_str("\"31/05/2024\",\"\",\"S A L D O\",\"\",\"\",\"0,00\",\n");
    csv
}

pub struct TestOptions {
    pub queue_size: usize,
    pub notifications_enabled: bool,
    pub registry: ParserRegistry,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            queue_size: 10,
            notifications_enabled: true,
            registry: ParserRegistry::with_default_parsers(),
        }
    }
}

/// Fully wired pipeline over in-memory collaborators.
pub struct TestApp {
    pub statements: Arc<InMemoryStatementStore>,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub notifier: Arc<ChannelNotifier>,
    pub notifications: UnboundedReceiver<Notification>,
    pub job: Arc<ImportBankStatementJob>,
    pub service: BankStatementService,
    pub worker: ImportWorker,
    pub dir: TempDir,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(TestOptions::default()).await
}

pub async fn spawn_app_with(options: TestOptions) -> TestApp {
    init_tracing();

    let statements = Arc::new(InMemoryStatementStore::new());
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let (notifier, notifications) = ChannelNotifier::with_enabled(options.notifications_enabled);
    let notifier = Arc::new(notifier);
    let banks: Arc<dyn BankDirectory> = Arc::new(
        InMemoryBankDirectory::new()
            .with_bank(bank(BANK_ID, CHURCH_ID, "Banco do Brasil", Some(ACCOUNT_ID)))
            .with_bank(bank(UNSUPPORTED_BANK_ID, CHURCH_ID, "Banco Inexistente", Some(ACCOUNT_ID)))
            .with_bank(bank(NO_ACCOUNT_BANK_ID, CHURCH_ID, "Banco do Brasil", None))
            .with_bank(bank(OTHER_CHURCH_BANK_ID, OTHER_CHURCH_ID, "Banco do Brasil", Some(ACCOUNT_ID)))
            .with_account(account()),
    );

    let statement_store: Arc<dyn StatementStore> = statements.clone();
    let ledger_store: Arc<dyn LedgerRecordStore> = ledger.clone();
    let dispatcher: Arc<dyn NotificationDispatcher> = notifier.clone();
    let registry = Arc::new(options.registry);

    let job = Arc::new(ImportBankStatementJob::new(
        registry.clone(),
        statement_store.clone(),
        Reconciler::new(statement_store.clone(), ledger_store.clone()),
        dispatcher,
        SUMMARY_TOPIC,
    ));
    let (worker, queue) = ImportWorker::new(
        ImportWorkerConfig {
            enabled: true,
            worker_count: 2,
            queue_size: options.queue_size,
        },
        job.clone(),
    );
    let service = BankStatementService::new(statement_store, ledger_store, banks, registry, queue);

    TestApp {
        statements,
        ledger,
        notifier,
        notifications,
        job,
        service,
        worker,
        dir: TempDir::new().expect("Failed to create temp dir"),
    }
}

impl TestApp {
    /// Write a statement file into the app's temp dir and return its path.
    pub fn write_file(&self, name: &str, contents: &str) -> String {
        let path: PathBuf = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("Failed to write statement file");
        path.to_string_lossy().into_owned()
    }

    pub fn payload(&self, file_location: &str) -> ImportJobPayload {
        ImportJobPayload {
            church_id: CHURCH_ID.to_string(),
            bank: bank(BANK_ID, CHURCH_ID, "Banco do Brasil", Some(ACCOUNT_ID)),
            availability_account: account(),
            month: 5,
            year: 2024,
            file_location: file_location.to_string(),
            uploaded_by: "tesoureiro@igreja.org".to_string(),
            queued_at: Utc::now(),
        }
    }

    pub fn add_record(&self, record: LedgerRecord) {
        self.ledger.insert(record).expect("Failed to insert ledger record");
    }

    pub fn stored(&self) -> Vec<BankStatement> {
        self.statements.all().expect("Failed to read statements")
    }

    pub fn stored_by_fit_id(&self, fit_id: &str) -> BankStatement {
        self.stored()
            .into_iter()
            .find(|s| s.fit_id == fit_id)
            .unwrap_or_else(|| panic!("No statement with fit_id {}", fit_id))
    }

    /// Wait for the next dispatched notification.
    pub async fn next_notification(&mut self) -> Option<Notification> {
        tokio::time::timeout(Duration::from_secs(5), self.notifications.recv())
            .await
            .ok()
            .flatten()
    }
}
