//! Bank statement parsers.
//!
//! Each parser turns one bank's export format into normalized
//! [`IntermediateStatementLine`]s. Parsers are looked up through the
//! [`ParserRegistry`] by bank name.

mod csv_parser;
mod normalize;
mod registry;

use crate::models::{AvailabilityAccount, BankIdentity, IntermediateStatementLine};
use async_trait::async_trait;
use service_core::error::AppError;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use csv_parser::{CsvDialect, CsvStatementParser};
pub use normalize::{
    normalize_bank_name, parse_localized_amount, parse_localized_date, statement_hash,
};
pub use registry::ParserRegistry;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("No parser for bank {0}")]
    UnsupportedBank(String),

    #[error("Failed to read statement file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed statement file: {0}")]
    Csv(#[from] csv::Error),

    #[error("Statement header is missing column '{0}'")]
    MissingColumn(String),

    #[error("Invalid row at line {line}: {reason}")]
    InvalidRow { line: u64, reason: String },

    #[error("Parser task failed: {0}")]
    Task(String),
}

impl From<ParseError> for AppError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Task(_) => AppError::InternalError(anyhow::Error::new(err)),
            other => AppError::BadRequest(anyhow::Error::new(other)),
        }
    }
}

#[async_trait]
pub trait StatementParser: Send + Sync {
    /// Short code used as the `fit_id` prefix, e.g. `BB`.
    fn bank_code(&self) -> &str;

    /// Bank names (and aliases) this parser handles.
    fn bank_names(&self) -> Vec<&str>;

    fn supports(&self, bank_name: &str) -> bool {
        let wanted = normalize_bank_name(bank_name);
        normalize_bank_name(self.bank_code()) == wanted
            || self
                .bank_names()
                .iter()
                .any(|name| normalize_bank_name(name) == wanted)
    }

    /// Parse the whole file. Any bad row fails the batch.
    async fn parse(
        &self,
        bank: &BankIdentity,
        availability_account: &AvailabilityAccount,
        file_path: &Path,
        month: i32,
        year: i32,
    ) -> Result<Vec<IntermediateStatementLine>, ParseError>;
}
