//! Services module for bank-statement-service.

pub mod database;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod outbox;
pub mod reconciler;
pub mod statements;
pub mod stores;

pub use database::Database;
pub use ledger::PgLedgerRecordStore;
pub use metrics::{get_metrics, init_metrics, record_error};
pub use outbox::OutboxNotifier;
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use statements::{BankStatementService, ImportAccepted, ImportBankStatementRequest};
pub use stores::{
    BankDirectory, LedgerRecordStore, NotificationDispatcher, StatementFilter, StatementStore,
};
