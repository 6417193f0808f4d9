mod import_job;
mod orchestrator;

pub use import_job::{ImportBankStatementJob, ImportJobPayload, ImportSummary};
pub use orchestrator::{ImportQueue, ImportWorker};
