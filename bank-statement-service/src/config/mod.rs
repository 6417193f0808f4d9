//! Configuration module for bank-statement-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct BankStatementConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub import: ImportWorkerConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ImportWorkerConfig {
    pub enabled: bool,
    /// Maximum number of import jobs processed at the same time.
    pub worker_count: usize,
    pub queue_size: usize,
}

impl Default for ImportWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_count: 4,
            queue_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub import_summary_topic: String,
    pub ledger_status_topic: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            import_summary_topic: "bank-statement.import.completed".to_string(),
            ledger_status_topic: "financial-record.status.updated".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl BankStatementConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let import_defaults = ImportWorkerConfig::default();
        let notification_defaults = NotificationConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "bank-statement-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS").unwrap_or(10),
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS").unwrap_or(2),
            },
            import: ImportWorkerConfig {
                enabled: parse_env("IMPORT_WORKER_ENABLED").unwrap_or(import_defaults.enabled),
                worker_count: parse_env::<usize>("IMPORT_WORKER_COUNT")
                    .unwrap_or(import_defaults.worker_count)
                    .max(1),
                queue_size: parse_env::<usize>("IMPORT_QUEUE_SIZE")
                    .unwrap_or(import_defaults.queue_size)
                    .max(1),
            },
            notifications: NotificationConfig {
                import_summary_topic: env::var("IMPORT_SUMMARY_TOPIC")
                    .unwrap_or(notification_defaults.import_summary_topic),
                ledger_status_topic: env::var("LEDGER_STATUS_TOPIC")
                    .unwrap_or(notification_defaults.ledger_status_topic),
            },
        })
    }
}
