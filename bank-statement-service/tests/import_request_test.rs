//! Integration tests for import requests and the queue worker.

mod common;

use bank_statement_service::models::{AvailabilityAccount, BankIdentity, IntermediateStatementLine};
use bank_statement_service::parsers::{ParseError, ParserRegistry, StatementParser};
use bank_statement_service::services::ImportBankStatementRequest;
use async_trait::async_trait;
use common::*;
use service_core::error::AppError;
use std::path::Path;
use std::sync::Arc;

fn request(bank_id: &str, file_location: &str) -> ImportBankStatementRequest {
    ImportBankStatementRequest {
        church_id: CHURCH_ID.to_string(),
        bank_id: bank_id.to_string(),
        month: 5,
        year: 2024,
        uploaded_by: "tesoureiro@igreja.org".to_string(),
        file_location: file_location.to_string(),
    }
}

#[tokio::test]
async fn accepted_request_returns_file_and_time() {
    let app = spawn_app().await;

    let accepted = app
        .service
        .import_bank_statement(request(BANK_ID, "/tmp/uploads/may.csv"))
        .await
        .unwrap();

    assert_eq!(accepted.file_path, "/tmp/uploads/may.csv");
    assert!(accepted.queued_at <= chrono::Utc::now());
    assert!(app.stored().is_empty());
}

#[tokio::test]
async fn invalid_month_is_rejected() {
    let app = spawn_app().await;

    for month in [0, 13] {
        let mut req = request(BANK_ID, "/tmp/may.csv");
        req.month = month;
        let result = app.service.import_bank_statement(req).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))), "month {}", month);
    }
}

#[tokio::test]
async fn unknown_or_foreign_bank_is_not_found() {
    let app = spawn_app().await;

    let result = app
        .service
        .import_bank_statement(request("bank-missing", "/tmp/may.csv"))
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let result = app
        .service
        .import_bank_statement(request(OTHER_CHURCH_BANK_ID, "/tmp/may.csv"))
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn bank_without_availability_account_is_rejected() {
    let app = spawn_app().await;

    let result = app
        .service
        .import_bank_statement(request(NO_ACCOUNT_BANK_ID, "/tmp/may.csv"))
        .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn bank_without_parser_is_rejected_before_queueing() {
    let app = spawn_app_with(TestOptions {
        queue_size: 1,
        ..Default::default()
    })
    .await;

    let result = app
        .service
        .import_bank_statement(request(UNSUPPORTED_BANK_ID, "/tmp/may.csv"))
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert!(err.to_string().contains("Banco Inexistente"));

    // Nothing was queued, so the single slot is still free.
    app.service
        .import_bank_statement(request(BANK_ID, "/tmp/may.csv"))
        .await
        .unwrap();
}

#[tokio::test]
async fn full_queue_reports_service_unavailable() {
    let app = spawn_app_with(TestOptions {
        queue_size: 1,
        ..Default::default()
    })
    .await;

    app.service
        .import_bank_statement(request(BANK_ID, "/tmp/one.csv"))
        .await
        .unwrap();
    let result = app
        .service
        .import_bank_statement(request(BANK_ID, "/tmp/two.csv"))
        .await;

    assert!(matches!(result, Err(AppError::ServiceUnavailable)));
}

#[tokio::test]
async fn worker_imports_queued_statement() {
    let mut app = spawn_app().await;
    let path = app.write_file(
        "may.csv",
        &statement_csv(&[("10/05/2024", "Pix - Recebido", "9001", "75,00")]),
    );

    let handle = app.worker.start().expect("worker started");
    app.service
        .import_bank_statement(request(BANK_ID, &path))
        .await
        .unwrap();

    let notification = app.next_notification().await.expect("summary notification");
    assert_eq!(notification.topic, SUMMARY_TOPIC);
    assert_eq!(notification.payload["inserted"], 1);
    assert_eq!(app.stored().len(), 1);
    assert!(!Path::new(&path).exists());

    app.worker.shutdown();
    handle.await.unwrap();
}

/// Parser that ignores the file and returns a fixed set of lines.
struct FixedParser;

#[async_trait]
impl StatementParser for FixedParser {
    fn bank_code(&self) -> &str {
        "REMOTE"
    }

    fn bank_names(&self) -> Vec<&str> {
        vec!["Banco Remoto"]
    }

    async fn parse(
        &self,
        _bank: &BankIdentity,
        _availability_account: &AvailabilityAccount,
        _file_path: &Path,
        _month: i32,
        _year: i32,
    ) -> Result<Vec<IntermediateStatementLine>, ParseError> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn registered_parser_handles_remote_and_local_locations() {
    let mut registry = ParserRegistry::with_default_parsers();
    registry.register(Arc::new(FixedParser));
    let app = spawn_app_with(TestOptions {
        registry,
        ..Default::default()
    })
    .await;
    let remote_bank = bank(BANK_ID, CHURCH_ID, "Banco Remoto", Some(ACCOUNT_ID));

    let mut payload = app.payload("https://storage.example.com/statements/may.csv");
    payload.bank = remote_bank.clone();
    let summary = app.job.handle(payload).await.unwrap();
    assert_eq!(summary.total_lines, 0);
    assert_eq!(summary.inserted, 0);

    // Local uploads are still cleaned up after the same parser runs.
    let local = app.write_file("remote.csv", "ignored");
    let mut payload = app.payload(&local);
    payload.bank = remote_bank;
    app.job.handle(payload).await.unwrap();
    assert!(!Path::new(&local).exists());
}
