//! Document ingestion: walk a directory of knowledge-base files and
//! index them.
//!
//! For each accepted file: front matter is parsed off the body, the body
//! is redacted according to its sensitivity label, chunked, embedded
//! inline (non-fatal on failure), and stored. Chunk replacement is
//! atomic per document, and the document id is derived from the file's
//! relative path so re-running ingestion supersedes rather than
//! duplicates.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::frontmatter::extract_front_matter;
use crate::models::Chunk;
use crate::redact::Redactor;
use crate::store;

const DEFAULT_SENSITIVITY: &str = "public";

/// Counters reported after one ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub files_seen: usize,
    pub documents_indexed: usize,
    pub chunks_written: usize,
    pub embeddings_written: usize,
    /// Chunks stored without a vector because embedding failed; they are
    /// invisible to retrieval until re-ingested.
    pub embeddings_pending: usize,
}

/// Ingest every matching file under `root`.
pub async fn run_ingest(
    config: &Config,
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    root: &Path,
) -> Result<IngestReport> {
    let include = build_globset(&config.ingest.include_globs)?;
    let exclude = build_globset(&config.ingest.exclude_globs)?;
    let redactor = Redactor::new(&config.redaction.document_rules);

    let mut report = IngestReport::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if !include.is_match(rel) || exclude.is_match(rel) {
            continue;
        }
        report.files_seen += 1;

        ingest_file(config, pool, embedder, &redactor, root, entry.path(), &mut report)
            .await
            .with_context(|| format!("Failed to ingest {}", entry.path().display()))?;
    }

    Ok(report)
}

async fn ingest_file(
    config: &Config,
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    redactor: &Redactor,
    root: &Path,
    path: &Path,
    report: &mut IngestReport,
) -> Result<()> {
    let raw = std::fs::read_to_string(path)?;
    let parsed = extract_front_matter(&raw);

    // Stable id from the relative path, so re-ingestion supersedes.
    let doc_id = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");

    let title = parsed
        .fields
        .get("title")
        .cloned()
        .or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
        });
    let sensitivity = parsed
        .fields
        .get("sensitivity")
        .cloned()
        .unwrap_or_else(|| DEFAULT_SENSITIVITY.to_string());

    let body = redactor.redact_document(&parsed.body, &sensitivity);

    let updated_at = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    let chunks = chunk_document(&doc_id, &body, &config.chunking)?;
    debug!(doc_id = %doc_id, chunks = chunks.len(), %sensitivity, "ingesting document");

    // Inline embedding, non-fatal: a chunk whose embedding fails is
    // stored without a vector and counted as pending.
    let mut stored: Vec<(Chunk, Option<Vec<f32>>)> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match embedder.embed(&chunk.text).await {
            Ok(vector) => {
                report.embeddings_written += 1;
                stored.push((chunk, Some(vector)));
            }
            Err(err) => {
                warn!(doc_id = %doc_id, index = chunk.sequence_index, error = %err,
                    "embedding failed; chunk stored without a vector");
                report.embeddings_pending += 1;
                stored.push((chunk, None));
            }
        }
    }

    store::upsert_document(pool, &doc_id, title.as_deref(), &sensitivity, updated_at).await?;
    store::replace_chunks(pool, &doc_id, &stored).await?;

    report.documents_indexed += 1;
    report.chunks_written += stored.len();
    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, Config, DbConfig};
    use crate::embedding::StubEmbedder;
    use crate::migrate;

    fn test_config() -> Config {
        Config {
            db: DbConfig {
                path: "unused.sqlite".into(),
            },
            chunking: ChunkingConfig {
                max_chars: 200,
                overlap_chars: 20,
            },
            retrieval: Default::default(),
            embedding: Default::default(),
            generation: Default::default(),
            pipeline: Default::default(),
            redaction: Default::default(),
            ingest: Default::default(),
        }
    }

    // One connection: pooled in-memory SQLite connections each see a
    // distinct database.
    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn ingests_matching_files_and_skips_others() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("handbook.md"),
            "---\ntitle: Handbook\n---\nVacation policy text.",
        )
        .unwrap();
        std::fs::write(tmp.path().join("image.png"), b"\x89PNG").unwrap();

        let config = test_config();
        let pool = test_pool().await;
        let embedder = StubEmbedder::new(16);

        let report = run_ingest(&config, &pool, &embedder, tmp.path()).await.unwrap();
        assert_eq!(report.files_seen, 1);
        assert_eq!(report.documents_indexed, 1);
        assert!(report.chunks_written >= 1);
        assert_eq!(report.embeddings_pending, 0);

        let metas = store::get_all_metadata(&pool).await.unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].title.as_deref(), Some("Handbook"));
        assert_eq!(metas[0].sensitivity, "public");
    }

    #[tokio::test]
    async fn reingest_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("doc.md"), "Some body text.").unwrap();

        let config = test_config();
        let pool = test_pool().await;
        let embedder = StubEmbedder::new(16);

        run_ingest(&config, &pool, &embedder, tmp.path()).await.unwrap();
        run_ingest(&config, &pool, &embedder, tmp.path()).await.unwrap();

        assert_eq!(store::document_count(&pool).await.unwrap(), 1);
        assert_eq!(
            store::chunk_count(&pool).await.unwrap(),
            store::vector_count(&pool).await.unwrap()
        );
    }

    #[tokio::test]
    async fn sensitive_documents_are_redacted_before_storage() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("roster.md"),
            "---\nsensitivity: confidential\n---\nReach hr@corp.example for questions.",
        )
        .unwrap();

        let mut config = test_config();
        config
            .redaction
            .document_rules
            .insert("confidential".to_string(), vec!["email".to_string()]);

        let pool = test_pool().await;
        let embedder = StubEmbedder::new(16);
        run_ingest(&config, &pool, &embedder, tmp.path()).await.unwrap();

        let text: String = sqlx::query_scalar("SELECT text FROM chunks LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(!text.contains("hr@corp.example"));
        assert!(text.contains("[EMAIL REDACTED]"));
    }

    #[tokio::test]
    async fn exclude_globs_are_honored() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("drafts")).unwrap();
        std::fs::write(tmp.path().join("keep.md"), "kept").unwrap();
        std::fs::write(tmp.path().join("drafts/skip.md"), "skipped").unwrap();

        let mut config = test_config();
        config.ingest.exclude_globs = vec!["drafts/**".to_string()];

        let pool = test_pool().await;
        let embedder = StubEmbedder::new(16);
        let report = run_ingest(&config, &pool, &embedder, tmp.path()).await.unwrap();
        assert_eq!(report.documents_indexed, 1);
    }
}
