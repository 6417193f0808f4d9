//! Bank statement aggregate and the parser's intermediate line.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use service_core::error::AppError;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::bank::{AvailabilityAccount, BankIdentity};

// ============================================================================
// Direction
// ============================================================================

/// Money flow of a statement line. The amount itself is always a magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Income,
    Outgo,
}

impl Direction {
    /// Direction implied by the sign of a raw bank value; zero counts as income.
    pub fn from_signed(value: Decimal) -> Self {
        if value.is_sign_negative() && !value.is_zero() {
            Self::Outgo
        } else {
            Self::Income
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "INCOME",
            Self::Outgo => "OUTGO",
        }
    }
}

impl FromStr for Direction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCOME" => Ok(Self::Income),
            "OUTGO" => Ok(Self::Outgo),
            other => Err(AppError::DatabaseError(anyhow::anyhow!(
                "Unknown statement direction: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Reconciliation lifecycle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    Pending,
    Reconciled,
    Unmatched,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Reconciled => "RECONCILED",
            Self::Unmatched => "UNMATCHED",
        }
    }
}

impl FromStr for ReconciliationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RECONCILED" => Ok(Self::Reconciled),
            "UNMATCHED" => Ok(Self::Unmatched),
            other => Err(AppError::BadRequest(anyhow::anyhow!(
                "Unknown reconciliation status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciliation state of a statement.
///
/// The bound ledger record and the reconciliation time only exist in the
/// `Reconciled` variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reconciliation {
    Pending,
    Unmatched,
    Reconciled {
        financial_record_id: String,
        reconciled_at: DateTime<Utc>,
    },
}

impl Reconciliation {
    pub fn status(&self) -> ReconciliationStatus {
        match self {
            Self::Pending => ReconciliationStatus::Pending,
            Self::Unmatched => ReconciliationStatus::Unmatched,
            Self::Reconciled { .. } => ReconciliationStatus::Reconciled,
        }
    }

    pub fn financial_record_id(&self) -> Option<&str> {
        match self {
            Self::Reconciled {
                financial_record_id,
                ..
            } => Some(financial_record_id),
            _ => None,
        }
    }

    pub fn reconciled_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Reconciled { reconciled_at, .. } => Some(*reconciled_at),
            _ => None,
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Bank identity as captured when the statement was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankSnapshot {
    pub bank_id: String,
    pub name: String,
    pub tag: String,
}

impl From<&BankIdentity> for BankSnapshot {
    fn from(bank: &BankIdentity) -> Self {
        Self {
            bank_id: bank.bank_id.clone(),
            name: bank.name.clone(),
            tag: bank.tag.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityAccountSnapshot {
    pub availability_account_id: String,
    pub account_name: String,
}

impl From<&AvailabilityAccount> for AvailabilityAccountSnapshot {
    fn from(account: &AvailabilityAccount) -> Self {
        Self {
            availability_account_id: account.availability_account_id.clone(),
            account_name: account.account_name.clone(),
        }
    }
}

// ============================================================================
// Intermediate line
// ============================================================================

/// One parsed row, normalized but not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntermediateStatementLine {
    pub bank: BankSnapshot,
    pub availability_account: AvailabilityAccountSnapshot,
    pub posted_at: DateTime<Utc>,
    pub amount: Decimal,
    pub description: String,
    pub direction: Direction,
    pub fit_id: String,
    pub hash: String,
    pub month: i32,
    pub year: i32,
    pub raw: Map<String, Value>,
}

// ============================================================================
// Bank statement
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankStatement {
    pub bank_statement_id: Uuid,
    pub church_id: String,
    pub bank: BankSnapshot,
    pub availability_account: AvailabilityAccountSnapshot,
    pub posted_at: DateTime<Utc>,
    pub amount: Decimal,
    pub description: String,
    pub direction: Direction,
    pub fit_id: String,
    pub hash: String,
    pub month: i32,
    pub year: i32,
    reconciliation: Reconciliation,
    pub raw: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BankStatement {
    /// Materialize a new `PENDING` statement from a parsed line.
    pub fn from_line(church_id: &str, line: IntermediateStatementLine, now: DateTime<Utc>) -> Self {
        Self {
            bank_statement_id: Uuid::new_v4(),
            church_id: church_id.to_string(),
            bank: line.bank,
            availability_account: line.availability_account,
            posted_at: line.posted_at,
            amount: line.amount.abs(),
            description: line.description,
            direction: line.direction,
            fit_id: line.fit_id,
            hash: line.hash,
            month: line.month,
            year: line.year,
            reconciliation: Reconciliation::Pending,
            raw: line.raw,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn reconciliation(&self) -> &Reconciliation {
        &self.reconciliation
    }

    pub fn status(&self) -> ReconciliationStatus {
        self.reconciliation.status()
    }

    pub fn financial_record_id(&self) -> Option<&str> {
        self.reconciliation.financial_record_id()
    }

    pub fn reconciled_at(&self) -> Option<DateTime<Utc>> {
        self.reconciliation.reconciled_at()
    }

    pub fn has_fit_id(&self) -> bool {
        !self.fit_id.is_empty()
    }

    pub(crate) fn mark_reconciled(&mut self, financial_record_id: String, at: DateTime<Utc>) {
        self.reconciliation = Reconciliation::Reconciled {
            financial_record_id,
            reconciled_at: at,
        };
        self.updated_at = at;
    }

    pub(crate) fn mark_unmatched(&mut self, at: DateTime<Utc>) {
        self.reconciliation = Reconciliation::Unmatched;
        self.updated_at = at;
    }
}

/// Flat row shape of the `bank_statements` table.
#[derive(Debug, Clone, FromRow)]
pub struct BankStatementRow {
    pub bank_statement_id: Uuid,
    pub church_id: String,
    pub bank_id: String,
    pub bank_name: String,
    pub bank_tag: String,
    pub availability_account_id: String,
    pub availability_account_name: String,
    pub posted_at: DateTime<Utc>,
    pub amount: Decimal,
    pub description: String,
    pub direction: String,
    pub fit_id: String,
    pub hash: String,
    pub month: i32,
    pub year: i32,
    pub reconciliation_status: String,
    pub financial_record_id: Option<String>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub raw: sqlx::types::Json<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BankStatementRow> for BankStatement {
    type Error = AppError;

    fn try_from(row: BankStatementRow) -> Result<Self, Self::Error> {
        let status = ReconciliationStatus::from_str(&row.reconciliation_status)
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("{}", e)))?;

        let reconciliation = match (status, row.financial_record_id, row.reconciled_at) {
            (ReconciliationStatus::Pending, _, _) => Reconciliation::Pending,
            (ReconciliationStatus::Unmatched, _, _) => Reconciliation::Unmatched,
            (ReconciliationStatus::Reconciled, Some(financial_record_id), Some(reconciled_at)) => {
                Reconciliation::Reconciled {
                    financial_record_id,
                    reconciled_at,
                }
            }
            (ReconciliationStatus::Reconciled, _, _) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Reconciled statement {} is missing its financial record",
                    row.bank_statement_id
                )));
            }
        };

        Ok(Self {
            bank_statement_id: row.bank_statement_id,
            church_id: row.church_id,
            bank: BankSnapshot {
                bank_id: row.bank_id,
                name: row.bank_name,
                tag: row.bank_tag,
            },
            availability_account: AvailabilityAccountSnapshot {
                availability_account_id: row.availability_account_id,
                account_name: row.availability_account_name,
            },
            posted_at: row.posted_at,
            amount: row.amount,
            description: row.description,
            direction: Direction::from_str(&row.direction)?,
            fit_id: row.fit_id,
            hash: row.hash,
            month: row.month,
            year: row.year,
            reconciliation,
            raw: row.raw.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
