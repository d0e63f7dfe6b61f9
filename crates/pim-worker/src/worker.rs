//! Worker poll loop
//!
//! One logical task per instance: claim a batch, stream and stage it, repeat.
//! At most one batch is in flight at a time; mutual exclusion across
//! instances comes entirely from the claim statement. Shutdown is observed
//! at iteration boundaries, so a batch in flight always reaches its terminal
//! transition before the process exits.

use tokio::sync::watch;
use tracing::{error, info, info_span, Instrument};

use crate::batch::ClaimedBatch;
use crate::claim;
use crate::config::Config;
use crate::error::WorkerResult;
use crate::pipeline::IngestionPipeline;
use crate::repository::Repository;
use crate::storage::Storage;

/// The ingestion worker: configuration plus its collaborators.
pub struct Worker {
    config: Config,
    repo: Repository,
    storage: Storage,
}

impl Worker {
    pub fn new(config: Config, repo: Repository, storage: Storage) -> Self {
        Self {
            config,
            repo,
            storage,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker.worker_id
    }

    /// Run the poll loop until the shutdown flag flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        info!(
            poll_interval_secs = self.config.worker.poll_interval_secs,
            max_attempts = self.config.worker.max_attempts,
            chunk_size = self.config.worker.chunk_size,
            "worker loop started"
        );

        while !*shutdown.borrow() {
            let batch = match claim::claim_batch(&self.repo, &self.config.worker).await {
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    self.idle(&mut shutdown).await;
                    continue;
                },
                Err(e) => {
                    error!(error = %e, "claim pass failed");
                    self.idle(&mut shutdown).await;
                    continue;
                },
            };

            // An uploaded batch without a storage path should be impossible;
            // leave it in `parsing` for the reaper rather than guessing a
            // terminal state here.
            let Some(storage_path) = batch
                .storage_path
                .clone()
                .filter(|p| !p.trim().is_empty())
            else {
                error!(
                    batch_id = %batch.id,
                    "claimed batch has no storage path, leaving for reaper"
                );
                self.idle(&mut shutdown).await;
                continue;
            };

            let span = info_span!(
                "batch",
                batch_id = %batch.id,
                casino_id = %batch.casino_id,
            );
            match self
                .process_batch(&batch, &storage_path)
                .instrument(span)
                .await
            {
                Ok(()) => {},
                Err(e) if e.is_terminal() => {
                    // Row cap: the pipeline already failed the batch.
                },
                Err(e) => {
                    error!(
                        batch_id = %batch.id,
                        error = %e,
                        "batch processing failed, leaving for reaper"
                    );
                    // Back off so a persistent infrastructure fault does not
                    // spin the loop.
                    self.idle(&mut shutdown).await;
                },
            }
        }

        info!("worker loop stopped");
        Ok(())
    }

    /// Download and ingest one claimed batch.
    async fn process_batch(&self, batch: &ClaimedBatch, storage_path: &str) -> WorkerResult<()> {
        info!(
            attempt = batch.attempt_count,
            file_name = batch.original_file_name.as_deref().unwrap_or(""),
            "processing batch"
        );

        let url = self
            .storage
            .signed_url(storage_path, self.config.worker.signed_url_expiry())
            .await?;
        let stream = self.storage.fetch_stream(&url).await?;

        let pipeline = IngestionPipeline::new(&self.repo, &self.config.worker);
        pipeline.run(batch, stream).await?;

        Ok(())
    }

    /// Sleep for the poll interval, waking early on shutdown.
    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        let sleep = tokio::time::sleep(self.config.worker.poll_interval());
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut sleep => {},
            _ = shutdown.changed() => {},
        }
    }

    /// Drain the database pool on shutdown.
    pub async fn close(&self) {
        self.repo.close().await;
    }
}
