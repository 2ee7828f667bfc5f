//! Pipeline error taxonomy.
//!
//! Every failure surfaced to a caller carries the identity of the stage
//! that failed, never the raw error text of the backend that caused it.
//! Upstream detail stays attached as an error `source` so it reaches
//! logs through the `tracing` layer, not the caller-facing message.

use thiserror::Error;

use crate::models::QueryOutcome;

/// The pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Retrieval,
    Generation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Embedding => write!(f, "embedding"),
            Stage::Retrieval => write!(f, "retrieval"),
            Stage::Generation => write!(f, "generation"),
        }
    }
}

/// Errors produced by the query pipeline.
///
/// Display messages are intentionally generic: callers learn which stage
/// failed and whether a retry makes sense, nothing more.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Caller input was malformed. Surfaced directly (4xx-equivalent).
    #[error("invalid request: {0}")]
    Validation(String),

    /// A stage exceeded its share of the request budget. Retryable.
    #[error("{stage} stage timed out")]
    Timeout { stage: Stage },

    /// A backend returned an error. Not retried within one request.
    #[error("{stage} stage failed")]
    Upstream {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    /// The generator returned unparsable structured output.
    #[error("generator returned malformed structured output")]
    MalformedResponse(#[source] anyhow::Error),

    /// Anything unexpected inside the pipeline.
    #[error("query pipeline failed")]
    Internal(#[source] anyhow::Error),
}

impl PipelineError {
    /// Machine-readable failure kind for the caller-facing response.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION_FAILED",
            PipelineError::Timeout { stage } | PipelineError::Upstream { stage, .. } => {
                match stage {
                    Stage::Embedding => "EMBEDDING_FAILED",
                    Stage::Retrieval => "RETRIEVAL_FAILED",
                    Stage::Generation => "GENERATION_FAILED",
                }
            }
            PipelineError::MalformedResponse(_) => "GENERATION_FAILED",
            PipelineError::Internal(_) => "RAG_QUERY_FAILED",
        }
    }

    /// The outcome recorded in the audit trail for this failure.
    pub fn outcome(&self) -> QueryOutcome {
        match self {
            PipelineError::Timeout { stage } | PipelineError::Upstream { stage, .. } => {
                match stage {
                    Stage::Embedding => QueryOutcome::EmbeddingFailed,
                    Stage::Retrieval => QueryOutcome::RetrievalFailed,
                    Stage::Generation => QueryOutcome::GenerationFailed,
                }
            }
            PipelineError::MalformedResponse(_) => QueryOutcome::GenerationFailed,
            PipelineError::Validation(_) | PipelineError::Internal(_) => QueryOutcome::Failed,
        }
    }

    /// Timeouts are safe to retry; backend and internal errors are not,
    /// at least not within the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Timeout { .. })
    }
}
