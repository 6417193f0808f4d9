//! Automatic matching of bank statements against ledger records.

use crate::models::{
    BankStatement, Direction, LedgerRecordFilter, LedgerRecordStatus, LedgerRecordType,
};
use crate::services::metrics::record_error;
use crate::services::stores::{LedgerRecordStore, StatementStore};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub matched: bool,
    pub financial_record_id: Option<String>,
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(at)
}

/// Ledger record types a statement of the given direction may settle.
fn record_types_for(direction: Direction) -> Vec<LedgerRecordType> {
    match direction {
        Direction::Income => vec![LedgerRecordType::Income],
        Direction::Outgo => vec![LedgerRecordType::Outgo, LedgerRecordType::Purchase],
    }
}

/// Ledger query for a statement: same church and account, exact amount,
/// compatible type, still open, dated on the posting day or the day either side.
pub fn filter_for(statement: &BankStatement) -> LedgerRecordFilter {
    let day = start_of_day(statement.posted_at);

    LedgerRecordFilter {
        church_id: statement.church_id.clone(),
        amount: statement.amount,
        date_from: day - Duration::days(1),
        date_until: day + Duration::days(2),
        record_types: record_types_for(statement.direction),
        statuses: vec![LedgerRecordStatus::Pending, LedgerRecordStatus::Cleared],
        availability_account_id: statement.availability_account.availability_account_id.clone(),
    }
}

#[derive(Clone)]
pub struct Reconciler {
    statements: Arc<dyn StatementStore>,
    ledger: Arc<dyn LedgerRecordStore>,
}

impl Reconciler {
    pub fn new(statements: Arc<dyn StatementStore>, ledger: Arc<dyn LedgerRecordStore>) -> Self {
        Self { statements, ledger }
    }

    /// Match a persisted statement against the ledger and persist the new state.
    ///
    /// Safe to call repeatedly; a statement may move from `UNMATCHED` to
    /// `RECONCILED` (or back) as the ledger changes.
    #[instrument(skip(self, statement), fields(bank_statement_id = %statement.bank_statement_id, church_id = %statement.church_id))]
    pub async fn reconcile(&self, statement: &mut BankStatement) -> Result<ReconcileOutcome, AppError> {
        let filter = filter_for(statement);
        let candidate = self.ledger.find_one(&filter).await?;
        let now = Utc::now();

        let Some(record) = candidate else {
            statement.mark_unmatched(now);
            self.statements.update_reconciliation(statement).await?;
            debug!(amount = %statement.amount, "No financial record matched");
            return Ok(ReconcileOutcome {
                matched: false,
                financial_record_id: None,
            });
        };

        statement.mark_reconciled(record.financial_record_id.clone(), now);
        self.statements.update_reconciliation(statement).await?;

        if let Err(e) = self
            .ledger
            .dispatch_status_update(&record, LedgerRecordStatus::Reconciled)
            .await
        {
            record_error("ledger_status_dispatch");
            warn!(
                error = %e,
                financial_record_id = %record.financial_record_id,
                "Failed to dispatch financial record status update"
            );
        }

        info!(financial_record_id = %record.financial_record_id, "Statement reconciled");
        Ok(ReconcileOutcome {
            matched: true,
            financial_record_id: Some(record.financial_record_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AvailabilityAccountSnapshot, BankSnapshot, IntermediateStatementLine, LedgerRecord,
    };
    use chrono::TimeZone;
    use rust_decimal::dec;
    use serde_json::Map;

    fn statement(posted_at: DateTime<Utc>, direction: Direction) -> BankStatement {
        let line = IntermediateStatementLine {
            bank: BankSnapshot {
                bank_id: "bank-1".to_string(),
                name: "Banco do Brasil".to_string(),
                tag: "BB".to_string(),
            },
            availability_account: AvailabilityAccountSnapshot {
                availability_account_id: "acc-1".to_string(),
                account_name: "Conta Movimento".to_string(),
            },
            posted_at,
            amount: dec!(150.00),
            description: "PIX".to_string(),
            direction,
            fit_id: String::new(),
            hash: "h".to_string(),
            month: 5,
            year: 2024,
            raw: Map::new(),
        };
        BankStatement::from_line("church-1", line, Utc::now())
    }

    fn record_at(date: DateTime<Utc>, record_type: LedgerRecordType) -> LedgerRecord {
        LedgerRecord {
            financial_record_id: "fr-1".to_string(),
            church_id: "church-1".to_string(),
            amount: dec!(150),
            date,
            record_type,
            status: LedgerRecordStatus::Pending,
            availability_account_id: "acc-1".to_string(),
        }
    }

    #[test]
    fn test_window_covers_previous_same_and_next_day() {
        let posted = Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap();
        let filter = filter_for(&statement(posted, Direction::Income));

        assert_eq!(filter.date_from, Utc.with_ymd_and_hms(2024, 5, 9, 0, 0, 0).unwrap());
        assert_eq!(filter.date_until, Utc.with_ymd_and_hms(2024, 5, 12, 0, 0, 0).unwrap());

        for date in [
            Utc.with_ymd_and_hms(2024, 5, 9, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 11, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 11, 23, 59, 59).unwrap(),
        ] {
            assert!(filter.matches(&record_at(date, LedgerRecordType::Income)), "{}", date);
        }
        for date in [
            Utc.with_ymd_and_hms(2024, 5, 8, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 12, 0, 0, 0).unwrap(),
        ] {
            assert!(!filter.matches(&record_at(date, LedgerRecordType::Income)), "{}", date);
        }
    }

    #[test]
    fn test_window_uses_calendar_day_of_posting() {
        let posted = Utc.with_ymd_and_hms(2024, 5, 10, 18, 30, 0).unwrap();
        let filter = filter_for(&statement(posted, Direction::Income));
        assert_eq!(filter.date_from, Utc.with_ymd_and_hms(2024, 5, 9, 0, 0, 0).unwrap());
        assert_eq!(filter.date_until, Utc.with_ymd_and_hms(2024, 5, 12, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_direction_selects_record_types() {
        let posted = Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap();

        let income = filter_for(&statement(posted, Direction::Income));
        assert_eq!(income.record_types, vec![LedgerRecordType::Income]);

        let outgo = filter_for(&statement(posted, Direction::Outgo));
        assert_eq!(
            outgo.record_types,
            vec![LedgerRecordType::Outgo, LedgerRecordType::Purchase]
        );
        assert!(!outgo.matches(&record_at(posted, LedgerRecordType::Income)));
        assert!(outgo.matches(&record_at(posted, LedgerRecordType::Purchase)));
    }

    #[test]
    fn test_only_open_records_are_candidates() {
        let posted = Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap();
        let filter = filter_for(&statement(posted, Direction::Income));

        let mut record = record_at(posted, LedgerRecordType::Income);
        record.status = LedgerRecordStatus::Cleared;
        assert!(filter.matches(&record));
        record.status = LedgerRecordStatus::Reconciled;
        assert!(!filter.matches(&record));
        record.status = LedgerRecordStatus::Void;
        assert!(!filter.matches(&record));
    }
}
