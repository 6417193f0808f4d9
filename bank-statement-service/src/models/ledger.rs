//! Ledger ("financial record") shapes the reconciler reads and updates.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerRecordType {
    Income,
    Outgo,
    Purchase,
}

impl LedgerRecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "INCOME",
            Self::Outgo => "OUTGO",
            Self::Purchase => "PURCHASE",
        }
    }
}

impl FromStr for LedgerRecordType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCOME" => Ok(Self::Income),
            "OUTGO" => Ok(Self::Outgo),
            "PURCHASE" => Ok(Self::Purchase),
            other => Err(AppError::DatabaseError(anyhow::anyhow!(
                "Unknown financial record type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerRecordStatus {
    Pending,
    Cleared,
    Reconciled,
    Void,
}

impl LedgerRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Cleared => "CLEARED",
            Self::Reconciled => "RECONCILED",
            Self::Void => "VOID",
        }
    }
}

impl FromStr for LedgerRecordStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CLEARED" => Ok(Self::Cleared),
            "RECONCILED" => Ok(Self::Reconciled),
            "VOID" => Ok(Self::Void),
            other => Err(AppError::DatabaseError(anyhow::anyhow!(
                "Unknown financial record status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub financial_record_id: String,
    pub church_id: String,
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub record_type: LedgerRecordType,
    pub status: LedgerRecordStatus,
    pub availability_account_id: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct LedgerRecordRow {
    pub financial_record_id: String,
    pub church_id: String,
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub record_type: String,
    pub status: String,
    pub availability_account_id: String,
}

impl TryFrom<LedgerRecordRow> for LedgerRecord {
    type Error = AppError;

    fn try_from(row: LedgerRecordRow) -> Result<Self, Self::Error> {
        Ok(Self {
            financial_record_id: row.financial_record_id,
            church_id: row.church_id,
            amount: row.amount,
            date: row.date,
            record_type: LedgerRecordType::from_str(&row.record_type)?,
            status: LedgerRecordStatus::from_str(&row.status)?,
            availability_account_id: row.availability_account_id,
        })
    }
}

/// Conjunctive point query over ledger records.
///
/// `date_from` is inclusive and `date_until` exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRecordFilter {
    pub church_id: String,
    pub amount: Decimal,
    pub date_from: DateTime<Utc>,
    pub date_until: DateTime<Utc>,
    pub record_types: Vec<LedgerRecordType>,
    pub statuses: Vec<LedgerRecordStatus>,
    pub availability_account_id: String,
}

impl LedgerRecordFilter {
    pub fn matches(&self, record: &LedgerRecord) -> bool {
        record.church_id == self.church_id
            && record.amount == self.amount
            && record.date >= self.date_from
            && record.date < self.date_until
            && self.record_types.contains(&record.record_type)
            && self.statuses.contains(&record.status)
            && record.availability_account_id == self.availability_account_id
    }

    pub fn record_type_strs(&self) -> Vec<String> {
        self.record_types.iter().map(|t| t.as_str().to_string()).collect()
    }

    pub fn status_strs(&self) -> Vec<String> {
        self.statuses.iter().map(|s| s.as_str().to_string()).collect()
    }
}
