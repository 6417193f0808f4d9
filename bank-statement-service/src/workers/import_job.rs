//! The per-file import pipeline run by the workers.

use crate::models::{
    AvailabilityAccount, AvailabilityAccountSnapshot, BankIdentity, BankSnapshot, BankStatement,
};
use crate::parsers::ParserRegistry;
use crate::services::metrics::{
    record_error, record_reconciliation, record_statement_import, record_statement_lines,
};
use crate::services::reconciler::Reconciler;
use crate::services::stores::{NotificationDispatcher, StatementStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Message carried by the import queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJobPayload {
    pub church_id: String,
    pub bank: BankIdentity,
    pub availability_account: AvailabilityAccount,
    pub month: i32,
    pub year: i32,
    pub file_location: String,
    pub uploaded_by: String,
    pub queued_at: DateTime<Utc>,
}

/// Counters reported once per imported file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub church_id: String,
    pub bank: BankSnapshot,
    pub availability_account: AvailabilityAccountSnapshot,
    pub month: i32,
    pub year: i32,
    pub uploaded_by: String,
    pub total_lines: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub matched: usize,
    pub pending: usize,
}

fn is_remote_location(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Parses one statement file, stores the new lines and reconciles them.
pub struct ImportBankStatementJob {
    registry: Arc<ParserRegistry>,
    statements: Arc<dyn StatementStore>,
    reconciler: Reconciler,
    notifier: Arc<dyn NotificationDispatcher>,
    summary_topic: String,
}

impl ImportBankStatementJob {
    pub fn new(
        registry: Arc<ParserRegistry>,
        statements: Arc<dyn StatementStore>,
        reconciler: Reconciler,
        notifier: Arc<dyn NotificationDispatcher>,
        summary_topic: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            statements,
            reconciler,
            notifier,
            summary_topic: summary_topic.into(),
        }
    }

    #[instrument(skip(self, payload), fields(church_id = %payload.church_id, bank = %payload.bank.name, month = payload.month, year = payload.year))]
    pub async fn handle(&self, payload: ImportJobPayload) -> Result<ImportSummary, AppError> {
        let start = Instant::now();

        let result = self.import(&payload).await;
        self.remove_file(&payload.file_location).await;

        let elapsed = start.elapsed().as_secs_f64();
        match &result {
            Ok(summary) => {
                record_statement_import("success", elapsed);
                tracing::info!(
                    total_lines = summary.total_lines,
                    inserted = summary.inserted,
                    duplicates = summary.duplicates,
                    matched = summary.matched,
                    pending = summary.pending,
                    duration_ms = start.elapsed().as_millis(),
                    "Bank statement import finished"
                );
                self.notify(summary);
            }
            Err(e) => {
                record_statement_import("failed", elapsed);
                record_error(e.kind());
                tracing::error!(error = %e, "Bank statement import failed");
            }
        }

        result
    }

    async fn import(&self, payload: &ImportJobPayload) -> Result<ImportSummary, AppError> {
        let parser = self.registry.resolve(&payload.bank.name)?;
        let lines = parser
            .parse(
                &payload.bank,
                &payload.availability_account,
                Path::new(&payload.file_location),
                payload.month,
                payload.year,
            )
            .await?;
        let total_lines = lines.len();

        let church_id = payload.church_id.as_str();
        let bank_id = payload.bank.bank_id.as_str();
        let now = Utc::now();

        let mut seen_fit_ids = HashSet::new();
        let mut seen_hashes = HashSet::new();
        let mut duplicates = 0;
        let mut candidates = Vec::with_capacity(lines.len());

        for line in lines {
            let has_fit_id = !line.fit_id.is_empty();
            let duplicate = (has_fit_id
                && (seen_fit_ids.contains(&line.fit_id)
                    || self
                        .statements
                        .exists_by_fit_id(church_id, bank_id, &line.fit_id)
                        .await?))
                || seen_hashes.contains(&line.hash)
                || self
                    .statements
                    .exists_by_hash(church_id, bank_id, &line.hash)
                    .await?;

            if duplicate {
                tracing::debug!(fit_id = %line.fit_id, hash = %line.hash, "Skipping already imported line");
                duplicates += 1;
                continue;
            }

            if has_fit_id {
                seen_fit_ids.insert(line.fit_id.clone());
            }
            seen_hashes.insert(line.hash.clone());
            candidates.push(BankStatement::from_line(church_id, line, now));
        }

        let inserted_ids: HashSet<Uuid> = self
            .statements
            .insert_many(&candidates)
            .await?
            .into_iter()
            .collect();

        // Rows lost to a concurrent import of the same data are duplicates too.
        let raced = candidates.len().saturating_sub(inserted_ids.len());
        duplicates += raced;
        let mut inserted: Vec<BankStatement> = candidates
            .into_iter()
            .filter(|s| inserted_ids.contains(&s.bank_statement_id))
            .collect();

        record_statement_lines("inserted", inserted.len());
        record_statement_lines("duplicate", duplicates);

        let mut matched = 0;
        for statement in inserted.iter_mut() {
            match self.reconciler.reconcile(statement).await {
                Ok(outcome) => {
                    record_reconciliation("auto", outcome.matched);
                    if outcome.matched {
                        matched += 1;
                    }
                }
                Err(e) => {
                    record_error(e.kind());
                    tracing::warn!(
                        bank_statement_id = %statement.bank_statement_id,
                        error = %e,
                        "Reconciliation failed, statement left pending"
                    );
                }
            }
        }

        Ok(ImportSummary {
            church_id: payload.church_id.clone(),
            bank: BankSnapshot::from(&payload.bank),
            availability_account: AvailabilityAccountSnapshot::from(&payload.availability_account),
            month: payload.month,
            year: payload.year,
            uploaded_by: payload.uploaded_by.clone(),
            total_lines,
            inserted: inserted.len(),
            duplicates,
            matched,
            pending: inserted.len() - matched,
        })
    }

    fn notify(&self, summary: &ImportSummary) {
        let payload = match serde_json::to_value(summary) {
            Ok(payload) => payload,
            Err(e) => {
                record_error("notification");
                tracing::warn!(error = %e, "Failed to serialize import summary");
                return;
            }
        };

        let notifier = self.notifier.clone();
        let topic = self.summary_topic.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.dispatch(&topic, payload).await {
                record_error("notification");
                tracing::warn!(topic = %topic, error = %e, "Failed to dispatch import summary");
            }
        });
    }

    async fn remove_file(&self, location: &str) {
        if is_remote_location(location) {
            tracing::debug!(location = %location, "Remote statement file left in place");
            return;
        }

        match tokio::fs::remove_file(location).await {
            Ok(()) => tracing::debug!(location = %location, "Statement file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(location = %location, error = %e, "Failed to remove statement file")
            }
        }
    }
}
