//! Append-only audit trail for query handling.
//!
//! Every query attempt — answered or failed — produces exactly one
//! [`AuditEntry`](crate::models::AuditEntry). The query text stored in
//! an entry has already been through redaction; raw query text must
//! never reach a sink. Audit writes are best-effort from the pipeline's
//! point of view: a failed write is logged, not surfaced to the caller.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Mutex;

use crate::models::AuditEntry;

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one entry. Entries are never updated or deleted.
    async fn log(&self, entry: AuditEntry) -> Result<()>;
}

/// Audit sink writing to the `audit_log` table.
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (user_id, redacted_query, timestamp, outcome, cost_estimate)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.user_id)
        .bind(&entry.redacted_query)
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.outcome.as_str())
        .bind(entry.cost_estimate as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-memory sink for tests. Entries are retained in arrival order.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit sink lock").clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        self.entries.lock().expect("audit sink lock").push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryOutcome;
    use chrono::Utc;

    #[tokio::test]
    async fn memory_sink_retains_entries_in_order() {
        let sink = MemoryAuditSink::new();
        for outcome in [QueryOutcome::Answered, QueryOutcome::GenerationFailed] {
            sink.log(AuditEntry {
                user_id: "u1".to_string(),
                redacted_query: "q".to_string(),
                timestamp: Utc::now(),
                outcome,
                cost_estimate: 12,
            })
            .await
            .unwrap();
        }

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, QueryOutcome::Answered);
        assert_eq!(entries[1].outcome, QueryOutcome::GenerationFailed);
    }
}
