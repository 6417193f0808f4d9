//! Application startup and lifecycle management.

use crate::config::BankStatementConfig;
use crate::parsers::ParserRegistry;
use crate::services::{
    get_metrics, init_metrics, BankDirectory, BankStatementService, Database,
    LedgerRecordStore, NotificationDispatcher, OutboxNotifier, PgLedgerRecordStore, Reconciler,
    StatementStore,
};
use crate::workers::{ImportBankStatementJob, ImportWorker};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use service_core::error::AppError;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    db: Arc<Database>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "bank-statement-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "bank-statement-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    db: Arc<Database>,
    service: BankStatementService,
    worker: ImportWorker,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BankStatementConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let db = Arc::new(db);
        let notifier: Arc<dyn NotificationDispatcher> =
            Arc::new(OutboxNotifier::new(db.pool().clone()));
        let ledger: Arc<dyn LedgerRecordStore> = Arc::new(PgLedgerRecordStore::new(
            db.pool().clone(),
            notifier.clone(),
            config.notifications.ledger_status_topic.clone(),
        ));
        let statements: Arc<dyn StatementStore> = db.clone();
        let banks: Arc<dyn BankDirectory> = db.clone();
        let registry = Arc::new(ParserRegistry::with_default_parsers());

        let job = Arc::new(ImportBankStatementJob::new(
            registry.clone(),
            statements.clone(),
            Reconciler::new(statements.clone(), ledger.clone()),
            notifier,
            config.notifications.import_summary_topic.clone(),
        ));
        let (worker, queue) = ImportWorker::new(config.import.clone(), job);
        let service = BankStatementService::new(statements, ledger, banks, registry, queue);

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Bank statement service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            db,
            service,
            worker,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Statement operations, for the transport layer that fronts this service.
    pub fn service(&self) -> &BankStatementService {
        &self.service
    }

    /// Serve until `signal` resolves, then stop the import worker.
    pub async fn run_until_stopped(
        mut self,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let health_state = HealthState {
            db: self.db.clone(),
        };

        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(health_state);

        let worker_handle = self.worker.start();
        let shutdown = self.worker.shutdown_token();

        tracing::info!(
            service = "bank-statement-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.http_listener, http_router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = signal => {},
                    _ = shutdown.cancelled() => {},
                }
            })
            .await;

        self.worker.shutdown();
        if let Some(handle) = worker_handle {
            let _ = handle.await;
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
