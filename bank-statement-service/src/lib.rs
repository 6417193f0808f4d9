//! Bank Statement Service - statement import, deduplication and ledger reconciliation.

pub mod config;
pub mod models;
pub mod parsers;
pub mod services;
pub mod startup;
pub mod workers;
