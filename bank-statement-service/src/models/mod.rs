//! Domain models for bank-statement-service.

mod bank;
mod ledger;
mod statement;

pub use bank::{AvailabilityAccount, BankIdentity};
pub use ledger::{LedgerRecord, LedgerRecordFilter, LedgerRecordRow, LedgerRecordStatus, LedgerRecordType};
pub use statement::{
    AvailabilityAccountSnapshot, BankSnapshot, BankStatement, BankStatementRow, Direction,
    IntermediateStatementLine, Reconciliation, ReconciliationStatus,
};
