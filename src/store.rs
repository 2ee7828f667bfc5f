//! SQLite persistence for documents, chunks, and chunk vectors.
//!
//! Re-ingesting a document supersedes its previous chunks atomically:
//! the old chunk rows and their vectors are removed and the new set is
//! inserted inside one transaction, so a query never observes a
//! half-replaced document.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::embedding::vec_to_blob;
use crate::models::{AuditEntry, Chunk, DocumentMeta, QueryOutcome};

/// Insert or update a document's metadata row.
pub async fn upsert_document(
    pool: &SqlitePool,
    id: &str,
    title: Option<&str>,
    sensitivity: &str,
    updated_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (id, title, sensitivity, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            sensitivity = excluded.sensitivity,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(id)
    .bind(title)
    .bind(sensitivity)
    .bind(updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace all chunks (and their vectors) for a document in one
/// transaction. A chunk with no vector yet is stored without a
/// `chunk_vectors` row and simply never matches retrieval.
pub async fn replace_chunks(
    pool: &SqlitePool,
    document_id: &str,
    chunks: &[(Chunk, Option<Vec<f32>>)],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for (chunk, vector) in chunks {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, sequence_index, text, hash)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.sequence_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        if let Some(vector) = vector {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Remove a document along with its chunks and vectors.
pub async fn delete_document(pool: &SqlitePool, document_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// All document metadata, most recently updated first.
pub async fn get_all_metadata(pool: &SqlitePool) -> Result<Vec<DocumentMeta>> {
    let rows = sqlx::query(
        r#"
        SELECT d.id, d.title, d.sensitivity, d.updated_at,
               COUNT(c.id) AS chunk_count
        FROM documents d
        LEFT JOIN chunks c ON c.document_id = d.id
        GROUP BY d.id
        ORDER BY d.updated_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| DocumentMeta {
            id: row.get("id"),
            title: row.get("title"),
            sensitivity: row.get("sensitivity"),
            updated_at: row.get("updated_at"),
            chunk_count: row.get("chunk_count"),
        })
        .collect())
}

pub async fn document_count(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn chunk_count(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Number of chunks that have an embedding and are retrievable.
pub async fn vector_count(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn audit_count(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// The most recent audit entries, newest first.
pub async fn recent_audit_entries(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT user_id, redacted_query, timestamp, outcome, cost_estimate
        FROM audit_log
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let timestamp: String = row.get("timestamp");
            let outcome: String = row.get("outcome");
            AuditEntry {
                user_id: row.get("user_id"),
                redacted_query: row.get("redacted_query"),
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                outcome: parse_outcome(&outcome),
                cost_estimate: row.get::<i64, _>("cost_estimate") as u64,
            }
        })
        .collect())
}

fn parse_outcome(s: &str) -> QueryOutcome {
    match s {
        "answered" => QueryOutcome::Answered,
        "embedding_failed" => QueryOutcome::EmbeddingFailed,
        "retrieval_failed" => QueryOutcome::RetrievalFailed,
        "generation_failed" => QueryOutcome::GenerationFailed,
        _ => QueryOutcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditSink, SqliteAuditSink};
    use crate::migrate;

    // One connection: every pooled connection to an in-memory SQLite
    // database sees a distinct database.
    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn chunk(id: &str, doc: &str, index: i64) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            sequence_index: index,
            text: format!("chunk {}", index),
            hash: "h".to_string(),
        }
    }

    #[tokio::test]
    async fn reingest_supersedes_previous_chunks() {
        let pool = test_pool().await;
        upsert_document(&pool, "doc1", Some("Handbook"), "public", 1).await.unwrap();

        let first = vec![
            (chunk("a", "doc1", 0), Some(vec![1.0f32, 0.0])),
            (chunk("b", "doc1", 1), Some(vec![0.0f32, 1.0])),
            (chunk("c", "doc1", 2), None),
        ];
        replace_chunks(&pool, "doc1", &first).await.unwrap();
        assert_eq!(chunk_count(&pool).await.unwrap(), 3);
        assert_eq!(vector_count(&pool).await.unwrap(), 2);

        let second = vec![(chunk("d", "doc1", 0), Some(vec![0.5f32, 0.5]))];
        replace_chunks(&pool, "doc1", &second).await.unwrap();
        assert_eq!(chunk_count(&pool).await.unwrap(), 1);
        assert_eq!(vector_count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn metadata_reports_chunk_counts() {
        let pool = test_pool().await;
        upsert_document(&pool, "doc1", None, "confidential", 42).await.unwrap();
        replace_chunks(
            &pool,
            "doc1",
            &[(chunk("a", "doc1", 0), None), (chunk("b", "doc1", 1), None)],
        )
        .await
        .unwrap();

        let metas = get_all_metadata(&pool).await.unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].sensitivity, "confidential");
        assert_eq!(metas[0].chunk_count, 2);
        assert_eq!(metas[0].title, None);
    }

    #[tokio::test]
    async fn delete_removes_document_and_children() {
        let pool = test_pool().await;
        upsert_document(&pool, "doc1", None, "public", 1).await.unwrap();
        replace_chunks(&pool, "doc1", &[(chunk("a", "doc1", 0), Some(vec![1.0]))])
            .await
            .unwrap();

        delete_document(&pool, "doc1").await.unwrap();
        assert_eq!(document_count(&pool).await.unwrap(), 0);
        assert_eq!(chunk_count(&pool).await.unwrap(), 0);
        assert_eq!(vector_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn audit_entries_roundtrip_through_sqlite() {
        let pool = test_pool().await;
        let sink = SqliteAuditSink::new(pool.clone());
        sink.log(AuditEntry {
            user_id: "u1".to_string(),
            redacted_query: "where is [EMAIL REDACTED] hosted?".to_string(),
            timestamp: Utc::now(),
            outcome: QueryOutcome::Answered,
            cost_estimate: 123,
        })
        .await
        .unwrap();

        let entries = recent_audit_entries(&pool, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, QueryOutcome::Answered);
        assert_eq!(entries[0].cost_estimate, 123);
        assert!(entries[0].redacted_query.contains("[EMAIL REDACTED]"));
        assert_eq!(audit_count(&pool).await.unwrap(), 1);
    }
}
