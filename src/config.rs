use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Soft upper bound on chunk length, in characters.
    pub max_chars: usize,
    #[serde(default = "default_overlap")]
    pub overlap_chars: usize,
}

fn default_overlap() -> usize {
    0
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "stub".to_string(),
            model: None,
            dims: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "stub".to_string(),
            model: None,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "stub".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Budget settings shared by every stage of one query.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Total wall-clock budget for one query, all stages combined.
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
    /// Upper bound on context tokens assembled for generation.
    #[serde(default = "default_token_ceiling")]
    pub token_ceiling: usize,
    /// Per-stage maxima; each stage gets min(remaining budget, its max).
    #[serde(default = "default_embed_max_ms")]
    pub embed_max_ms: u64,
    #[serde(default = "default_retrieve_max_ms")]
    pub retrieve_max_ms: u64,
    #[serde(default = "default_generate_max_ms")]
    pub generate_max_ms: u64,
    /// Bound on accepted question length, in characters.
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            total_timeout_ms: default_total_timeout_ms(),
            token_ceiling: default_token_ceiling(),
            embed_max_ms: default_embed_max_ms(),
            retrieve_max_ms: default_retrieve_max_ms(),
            generate_max_ms: default_generate_max_ms(),
            max_query_chars: default_max_query_chars(),
        }
    }
}

fn default_total_timeout_ms() -> u64 {
    30_000
}
fn default_token_ceiling() -> usize {
    3_000
}
fn default_embed_max_ms() -> u64 {
    8_000
}
fn default_retrieve_max_ms() -> u64 {
    5_000
}
fn default_generate_max_ms() -> u64 {
    25_000
}
fn default_max_query_chars() -> usize {
    4_000
}

/// Document-side redaction rules, keyed by the `sensitivity` front-matter
/// field. Query-side redaction for the audit trail is unconditional and
/// not configurable here.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedactionConfig {
    /// Map of sensitivity label → pattern names (`email`, `phone`, `national_id`)
    /// applied to document bodies during ingestion.
    #[serde(default)]
    pub document_rules: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!(
            "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
            config.chunking.overlap_chars,
            config.chunking.max_chars
        );
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate budget
    if config.pipeline.token_ceiling == 0 {
        anyhow::bail!("pipeline.token_ceiling must be >= 1");
    }
    if config.pipeline.total_timeout_ms < 100 {
        anyhow::bail!("pipeline.total_timeout_ms must be >= 100");
    }

    // Validate providers
    match config.embedding.provider.as_str() {
        "stub" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be set when provider is 'openai'");
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be stub or openai.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "stub" => {}
        "openai" => {
            if config.generation.model.is_none() {
                anyhow::bail!("generation.model must be set when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be stub or openai.",
            other
        ),
    }

    // Validate redaction rule names
    for (sensitivity, rules) in &config.redaction.document_rules {
        for rule in rules {
            match rule.as_str() {
                "email" | "phone" | "national_id" => {}
                other => anyhow::bail!(
                    "Unknown redaction rule '{}' for sensitivity '{}'. \
                     Must be email, phone, or national_id.",
                    other,
                    sensitivity
                ),
            }
        }
    }

    Ok(config)
}
