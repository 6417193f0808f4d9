//! Bounded import queue and the worker pool that drains it.

use crate::config::ImportWorkerConfig;
use crate::workers::import_job::{ImportBankStatementJob, ImportJobPayload};
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Producer side of the import queue.
#[derive(Clone)]
pub struct ImportQueue {
    job_tx: mpsc::Sender<ImportJobPayload>,
}

impl ImportQueue {
    pub fn enqueue(&self, job: ImportJobPayload) -> Result<(), AppError> {
        self.job_tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AppError::ServiceUnavailable,
            mpsc::error::TrySendError::Closed(_) => {
                AppError::InternalError(anyhow::anyhow!("Import queue closed"))
            }
        })
    }
}

/// Consumes the import queue and runs each job on its own task.
pub struct ImportWorker {
    config: ImportWorkerConfig,
    job: Arc<ImportBankStatementJob>,
    job_rx: Option<mpsc::Receiver<ImportJobPayload>>,
    shutdown_token: CancellationToken,
}

impl ImportWorker {
    pub fn new(config: ImportWorkerConfig, job: Arc<ImportBankStatementJob>) -> (Self, ImportQueue) {
        let (job_tx, job_rx) = mpsc::channel(config.queue_size.max(1));

        let worker = Self {
            config,
            job,
            job_rx: Some(job_rx),
            shutdown_token: CancellationToken::new(),
        };

        (worker, ImportQueue { job_tx })
    }

    /// Token that stops the distributor when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn the job distributor. Calling this more than once is a no-op.
    pub fn start(&mut self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Import worker disabled by configuration");
            return None;
        }

        let Some(mut job_rx) = self.job_rx.take() else {
            tracing::warn!("Import worker already started");
            return None;
        };

        let worker_count = self.config.worker_count.max(1);
        tracing::info!(worker_count = worker_count, "Starting import worker");

        let permits = Arc::new(Semaphore::new(worker_count));
        let shutdown = self.shutdown_token.clone();
        let job = self.job.clone();

        Some(tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Import distributor shutting down");
                        break;
                    }
                    payload = job_rx.recv() => match payload {
                        Some(payload) => payload,
                        None => {
                            tracing::info!("Import queue closed, distributor exiting");
                            break;
                        }
                    },
                };

                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                tracing::info!(
                    church_id = %payload.church_id,
                    bank_id = %payload.bank.bank_id,
                    "Dispatching import job"
                );

                let job = job.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    // Outcome is logged and counted by the job itself.
                    let _ = job.handle(payload).await;
                });
            }
        }))
    }

    pub fn shutdown(&self) {
        tracing::info!("Initiating import worker shutdown");
        self.shutdown_token.cancel();
    }
}
