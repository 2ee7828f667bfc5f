//! Index statistics for the `stats` command.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::store;

#[derive(Debug, Serialize)]
pub struct Stats {
    pub documents: i64,
    pub chunks: i64,
    /// Chunks with an embedding, i.e. visible to retrieval.
    pub vectors: i64,
    pub audit_entries: i64,
}

pub async fn gather(pool: &SqlitePool) -> Result<Stats> {
    Ok(Stats {
        documents: store::document_count(pool).await?,
        chunks: store::chunk_count(pool).await?,
        vectors: store::vector_count(pool).await?,
        audit_entries: store::audit_count(pool).await?,
    })
}
