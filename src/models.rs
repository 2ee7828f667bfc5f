//! Core data models used throughout Groundwork.
//!
//! These types represent the documents, chunks, retrieval matches, and
//! answers that flow through the ingestion and query pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A chunk of a document's body text — the unit of embedding and retrieval.
///
/// Immutable once created; re-ingesting a document supersedes its chunks
/// atomically rather than mutating them.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Position within the source document, contiguous from 0.
    pub sequence_index: i64,
    pub text: String,
    /// SHA-256 of the chunk text, for staleness detection.
    pub hash: String,
}

/// Document metadata as stored, without the body.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentMeta {
    pub id: String,
    pub title: Option<String>,
    pub sensitivity: String,
    pub updated_at: i64,
    pub chunk_count: i64,
}

/// A retrieval match returned from the similarity retriever.
///
/// Ephemeral: created per query, never persisted.
#[derive(Debug, Clone)]
pub struct RetrievedMatch {
    pub chunk_id: String,
    pub document_id: String,
    pub title: Option<String>,
    /// Similarity score; higher is more relevant.
    pub score: f64,
    pub text: String,
}

/// Profile of the user asking a question, supplied by the caller.
///
/// Carried on the request for embedding callers to consult, but never
/// forwarded to the generator or written to the audit trail: the name,
/// department, and role are personal data and the prompt and audit paths
/// must stay free of them.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub name: String,
    pub department: String,
    pub role: String,
}

/// A question to answer, as received from the caller.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query_text: String,
    pub user_id: String,
    pub user_profile: UserProfile,
    /// Prior turns, oldest first. Redacted before it reaches the generator.
    pub conversation_history: Vec<String>,
}

impl QueryRequest {
    pub fn new(query_text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            user_id: user_id.into(),
            user_profile: UserProfile::default(),
            conversation_history: Vec::new(),
        }
    }
}

/// A source citation mapping an answer back to a stored chunk.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub doc_id: String,
    pub title: Option<String>,
    pub score: f64,
}

/// Token accounting reported with an answer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// The grounded answer returned to the caller.
///
/// The `answer` text is never redacted — redaction applies only to the
/// audit/log path.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub usage: Usage,
    pub confidence: f64,
    pub missing_information: bool,
}

/// Terminal outcome of one pipeline run, recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Answered,
    EmbeddingFailed,
    RetrievalFailed,
    GenerationFailed,
    Failed,
}

impl QueryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOutcome::Answered => "answered",
            QueryOutcome::EmbeddingFailed => "embedding_failed",
            QueryOutcome::RetrievalFailed => "retrieval_failed",
            QueryOutcome::GenerationFailed => "generation_failed",
            QueryOutcome::Failed => "failed",
        }
    }
}

/// Append-only audit record for one query.
///
/// `redacted_query` must already have passed through the redactor; no
/// raw query or chunk text is ever stored here.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub user_id: String,
    pub redacted_query: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: QueryOutcome,
    /// Estimated total tokens consumed, used for cost tracking.
    pub cost_estimate: u64,
}
