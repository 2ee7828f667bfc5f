//! Similarity retriever abstraction and implementations.
//!
//! Given a query vector, a retriever returns the top-K most similar
//! stored chunks with scores. The pipeline treats it as a read-only
//! external capability: an empty result set is a valid answer, and
//! ingestion owns all writes.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::models::RetrievedMatch;

/// An external capability answering nearest-neighbour queries.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `top_k` matches ordered by descending score.
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedMatch>>;
}

/// Retriever over the local SQLite chunk store.
///
/// Loads stored chunk vectors and scores them by cosine similarity in
/// process. Fine for the knowledge-base sizes this tool targets; an
/// ANN index sits behind the same trait if that ever changes.
pub struct SqliteRetriever {
    pool: SqlitePool,
}

impl SqliteRetriever {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Retriever for SqliteRetriever {
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedMatch>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.document_id, cv.embedding, c.text, d.title
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = cv.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut matches: Vec<RetrievedMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                RetrievedMatch {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    title: row.get("title"),
                    score: cosine_similarity(vector, &stored) as f64,
                    text: row.get("text"),
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(top_k);

        Ok(matches)
    }
}

/// Canned retriever for tests and demos: always returns the same
/// matches, truncated to `top_k`.
pub struct StaticRetriever {
    matches: Vec<RetrievedMatch>,
}

impl StaticRetriever {
    pub fn new(matches: Vec<RetrievedMatch>) -> Self {
        Self { matches }
    }

    /// A retriever that never finds anything.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(&self, _vector: &[f32], top_k: usize) -> Result<Vec<RetrievedMatch>> {
        let mut out = self.matches.clone();
        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out.truncate(top_k);
        Ok(out)
    }
}
