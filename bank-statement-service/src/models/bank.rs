//! Bank directory entries, referenced by value.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A bank known to a church, with the ledger account its statements post to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BankIdentity {
    pub bank_id: String,
    pub church_id: String,
    pub name: String,
    pub tag: String,
    pub availability_account_id: Option<String>,
}

/// Ledger-side account ("availability account") a bank feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AvailabilityAccount {
    pub availability_account_id: String,
    pub church_id: String,
    pub account_name: String,
}
