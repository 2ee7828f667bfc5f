//! The query pipeline: validate, embed, retrieve, assemble, generate,
//! audit.
//!
//! One [`QueryPipeline`] is built per process and shared across queries.
//! Each call to [`QueryPipeline::answer`] runs the stages in order under
//! a single [`Budget`]: every external stage is bounded by
//! `min(remaining budget, its configured max)`, so a slow embedding call
//! eats into the time available to generation but can never extend the
//! request past the global deadline.
//!
//! Exactly one audit entry is written per query attempt, success or
//! failure, with the query text redacted first. An audit write failure
//! is logged and absorbed; it never changes the caller-visible result.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audit::AuditSink;
use crate::budget::{estimate_tokens, truncate_to_token_budget, Budget};
use crate::config::{Config, PipelineConfig, RetrievalConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{PipelineError, Stage};
use crate::generate::{create_generator, Generation, Generator, MalformedOutput};
use crate::models::{AnswerResult, AuditEntry, QueryOutcome, QueryRequest, RetrievedMatch, SourceRef};
use crate::redact::Redactor;
use crate::retrieve::Retriever;

pub struct QueryPipeline {
    embedder: Arc<dyn Embedder>,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    audit: Arc<dyn AuditSink>,
    redactor: Redactor,
    pipeline: PipelineConfig,
    retrieval: RetrievalConfig,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        audit: Arc<dyn AuditSink>,
        redactor: Redactor,
        pipeline: PipelineConfig,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            retriever,
            generator,
            audit,
            redactor,
            pipeline,
            retrieval,
        }
    }

    /// Build a pipeline from configuration, with the given retriever and
    /// audit sink. Embedder and generator come from their provider
    /// settings.
    pub fn from_config(
        config: &Config,
        retriever: Arc<dyn Retriever>,
        audit: Arc<dyn AuditSink>,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(
            Arc::from(create_embedder(&config.embedding)?),
            retriever,
            Arc::from(create_generator(&config.generation)?),
            audit,
            Redactor::new(&config.redaction.document_rules),
            config.pipeline.clone(),
            config.retrieval.clone(),
        ))
    }

    /// Answer one query end to end.
    pub async fn answer(&self, request: QueryRequest) -> Result<AnswerResult, PipelineError> {
        let redacted_query = self.redactor.redact(request.query_text.trim());

        match self.run(&request).await {
            Ok((result, cost)) => {
                info!(
                    user_id = %request.user_id,
                    sources = result.sources.len(),
                    cost_estimate = cost,
                    "query answered"
                );
                self.write_audit(&request.user_id, &redacted_query, QueryOutcome::Answered, cost)
                    .await;
                Ok(result)
            }
            Err(err) => {
                warn!(
                    user_id = %request.user_id,
                    kind = err.kind(),
                    error = ?err,
                    "query failed"
                );
                self.write_audit(&request.user_id, &redacted_query, err.outcome(), 0)
                    .await;
                Err(err)
            }
        }
    }

    async fn run(&self, request: &QueryRequest) -> Result<(AnswerResult, u64), PipelineError> {
        // ---- Validation ----
        let query = request.query_text.trim().to_string();
        if query.is_empty() {
            return Err(PipelineError::Validation("query text is empty".to_string()));
        }
        if query.chars().count() > self.pipeline.max_query_chars {
            return Err(PipelineError::Validation(format!(
                "query text exceeds {} characters",
                self.pipeline.max_query_chars
            )));
        }
        if request.user_id.trim().is_empty() {
            return Err(PipelineError::Validation("user_id is empty".to_string()));
        }

        let budget = Budget::start(&self.pipeline);

        // ---- Embedding ----
        let embedder = self.embedder.clone();
        let embed_query = query.clone();
        let vector = budget
            .run_stage(
                Stage::Embedding,
                Duration::from_millis(self.pipeline.embed_max_ms),
                async move { embedder.embed(&embed_query).await },
            )
            .await?;
        debug!(dims = vector.len(), "query embedded");

        // ---- Retrieval ----
        if budget.exhausted() {
            return Err(PipelineError::Timeout {
                stage: Stage::Retrieval,
            });
        }
        let retriever = self.retriever.clone();
        let top_k = self.retrieval.top_k;
        let matches = budget
            .run_stage(
                Stage::Retrieval,
                Duration::from_millis(self.pipeline.retrieve_max_ms),
                async move { retriever.search(&vector, top_k).await },
            )
            .await?;
        debug!(matches = matches.len(), "retrieval complete");

        // ---- Assembly ----
        let (context, surviving) = assemble_context(&matches, budget.token_ceiling());
        let redacted_history: Vec<String> = request
            .conversation_history
            .iter()
            .map(|turn| self.redactor.redact(turn))
            .collect();

        // ---- Generation ----
        if budget.exhausted() {
            return Err(PipelineError::Timeout {
                stage: Stage::Generation,
            });
        }
        let generator = self.generator.clone();
        let gen_context = context.clone();
        let gen_query = query.clone();
        let generation = budget
            .run_stage(
                Stage::Generation,
                Duration::from_millis(self.pipeline.generate_max_ms),
                async move {
                    generator
                        .generate(&gen_context, &gen_query, &redacted_history)
                        .await
                },
            )
            .await
            .map_err(classify_generation_error)?;

        let sources = cited_sources(&surviving, &generation);
        let cost = cost_estimate(&generation, &context, &query);

        Ok((
            AnswerResult {
                answer: generation.answer,
                sources,
                usage: generation.usage,
                confidence: generation.confidence,
                missing_information: generation.missing_information,
            },
            cost,
        ))
    }

    async fn write_audit(
        &self,
        user_id: &str,
        redacted_query: &str,
        outcome: QueryOutcome,
        cost_estimate: u64,
    ) {
        let entry = AuditEntry {
            user_id: user_id.to_string(),
            redacted_query: redacted_query.to_string(),
            timestamp: chrono::Utc::now(),
            outcome,
            cost_estimate,
        };
        if let Err(err) = self.audit.log(entry).await {
            warn!(error = %err, "audit write failed; continuing");
        }
    }
}

/// Build the generation context from matches in descending score order,
/// under the token ceiling. The block that would cross the ceiling is
/// truncated to the remaining budget rather than dropped, and keeps its
/// citation; everything after it is dropped. Returns the context block
/// and the matches that made it in, in context order.
fn assemble_context(
    matches: &[RetrievedMatch],
    token_ceiling: usize,
) -> (String, Vec<RetrievedMatch>) {
    let mut context = String::new();
    let mut surviving = Vec::new();

    for m in matches {
        let title = m.title.as_deref().unwrap_or("untitled");
        let block = format!("[{}] {}\n{}\n\n", surviving.len() + 1, title, m.text);
        let remaining = token_ceiling.saturating_sub(estimate_tokens(&context));

        if estimate_tokens(&block) <= remaining {
            context.push_str(&block);
            surviving.push(m.clone());
            continue;
        }

        let truncated = truncate_to_token_budget(&block, remaining);
        if !truncated.trim().is_empty() {
            context.push_str(&truncated);
            surviving.push(m.clone());
        }
        break;
    }

    (context, surviving)
}

/// Map the surviving matches to citations. When the generator named the
/// chunks it used and at least one is recognizable, the citation list is
/// narrowed to those; otherwise every surviving chunk is cited.
fn cited_sources(surviving: &[RetrievedMatch], generation: &Generation) -> Vec<SourceRef> {
    let all: Vec<SourceRef> = surviving
        .iter()
        .map(|m| SourceRef {
            id: m.chunk_id.clone(),
            doc_id: m.document_id.clone(),
            title: m.title.clone(),
            score: m.score,
        })
        .collect();

    if generation.cited_chunk_ids.is_empty() {
        return all;
    }
    let narrowed: Vec<SourceRef> = all
        .iter()
        .filter(|s| generation.cited_chunk_ids.contains(&s.id))
        .cloned()
        .collect();
    if narrowed.is_empty() {
        all
    } else {
        narrowed
    }
}

fn cost_estimate(generation: &Generation, context: &str, query: &str) -> u64 {
    if generation.usage.total_tokens > 0 {
        generation.usage.total_tokens
    } else {
        (estimate_tokens(context) + estimate_tokens(query) + estimate_tokens(&generation.answer))
            as u64
    }
}

/// Malformed structured output is its own failure mode; everything else
/// from the generation stage passes through unchanged.
fn classify_generation_error(err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Upstream {
            stage: Stage::Generation,
            source,
        } => {
            if source.downcast_ref::<MalformedOutput>().is_some() {
                PipelineError::MalformedResponse(source)
            } else {
                PipelineError::Upstream {
                    stage: Stage::Generation,
                    source,
                }
            }
        }
        other => other,
    }
}
