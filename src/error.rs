//! Pipeline error taxonomy.
//!
//! Every failure inside an ingestion or deck-generation run is classified
//! once, at the top of the pipeline, into one of two kinds:
//!
//! - [`PipelineError::Content`] — the input itself is bad (corrupt document,
//!   unknown extension, unparseable model output). Terminal: the owning
//!   entity is marked `error` and the job runner does not retry.
//! - [`PipelineError::Transient`] — infrastructure failed (network, storage,
//!   model provider). The job runner re-runs the whole pipeline from scratch
//!   up to its attempt budget.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed input or model output. Not retried.
    #[error("content error: {0}")]
    Content(String),

    /// Infrastructure failure. Retried up to the job's attempt budget.
    #[error("transient error: {0}")]
    Transient(#[source] anyhow::Error),
}

impl PipelineError {
    pub fn content(msg: impl Into<String>) -> Self {
        PipelineError::Content(msg.into())
    }

    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        PipelineError::Transient(err.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }
}

/// Database and storage errors are infrastructure by definition.
impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Transient(err.into())
    }
}
