//! Claim orchestration
//!
//! One orchestrator pass: run the stale-claim reaper, then try to claim one
//! batch. The reaper runs first so a batch it just recovered is eligible for
//! the claim in the same pass.

use tracing::{info, warn};

use crate::batch::ClaimedBatch;
use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::repository::Repository;

/// Reap stale claims, then claim the oldest `uploaded` batch, if any.
pub async fn claim_batch(
    repo: &Repository,
    config: &WorkerConfig,
) -> WorkerResult<Option<ClaimedBatch>> {
    let outcome = repo
        .reap_stale(config.heartbeat_stale(), config.max_attempts)
        .await?;

    if outcome.reset > 0 {
        info!(count = outcome.reset, "reaper reset stale batches for retry");
    }
    if outcome.failed > 0 {
        warn!(
            count = outcome.failed,
            "reaper failed batches that exhausted their attempts"
        );
    }

    repo.claim_next(&config.worker_id).await
}
