//! Job runners wrapping the pipelines with retry budgets.
//!
//! Each attempt re-runs the pipeline from scratch; ingestion's
//! delete-then-insert makes that safe. Content errors stop immediately
//! (the entity is already marked `error` and rerunning cannot fix the
//! input); transient errors sleep a fixed countdown and try again until
//! the attempt budget is spent.

use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{error, warn};

use crate::config::Config;
use crate::deck::run_deck;
use crate::error::PipelineError;
use crate::ingest::{run_ingest, IngestReport};
use crate::traits::{BlobStore, Embedder, TextModel};

pub async fn run_ingest_job(
    pool: &SqlitePool,
    blobs: &dyn BlobStore,
    embedder: &dyn Embedder,
    config: &Config,
    file_id: &str,
) -> Result<IngestReport, PipelineError> {
    let max_attempts = config.jobs.ingest_max_attempts;
    let countdown = Duration::from_secs(config.jobs.ingest_countdown_secs);

    for attempt in 1..=max_attempts {
        match run_ingest(pool, blobs, embedder, &config.chunking, file_id).await {
            Ok(report) => return Ok(report),
            Err(e) if !e.is_retryable() => {
                error!(file_id, %e, "ingest failed on unprocessable input");
                return Err(e);
            }
            Err(e) if attempt < max_attempts => {
                warn!(file_id, attempt, %e, "ingest attempt failed, will retry");
                tokio::time::sleep(countdown).await;
            }
            Err(e) => {
                error!(file_id, attempts = max_attempts, %e, "ingest gave up");
                return Err(e);
            }
        }
    }
    unreachable!("attempt budget is validated to be >= 1")
}

pub async fn run_deck_job(
    pool: &SqlitePool,
    blobs: &dyn BlobStore,
    embedder: &dyn Embedder,
    model: &dyn TextModel,
    config: &Config,
    artifact_id: &str,
) -> Result<(), PipelineError> {
    let max_attempts = config.jobs.deck_max_attempts;
    let countdown = Duration::from_secs(config.jobs.deck_countdown_secs);

    for attempt in 1..=max_attempts {
        match run_deck(pool, blobs, embedder, model, config, artifact_id).await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_retryable() => {
                error!(artifact_id, %e, "deck generation failed on unprocessable input");
                return Err(e);
            }
            Err(e) if attempt < max_attempts => {
                warn!(artifact_id, attempt, %e, "deck attempt failed, will retry");
                tokio::time::sleep(countdown).await;
            }
            Err(e) => {
                error!(artifact_id, attempts = max_attempts, %e, "deck generation gave up");
                return Err(e);
            }
        }
    }
    unreachable!("attempt budget is validated to be >= 1")
}
