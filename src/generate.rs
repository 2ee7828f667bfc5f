//! Answer generator abstraction and implementations.
//!
//! The generator turns an assembled context block plus the user's
//! question into a structured, citable answer. Its output is
//! semi-trusted: the model is instructed to reply with a single JSON
//! object, and that payload is validated against a typed schema before
//! anything downstream touches it. Output that fails validation is a
//! [`MalformedOutput`] error — never silently returned as an answer.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::Usage;

/// Validated generator output.
#[derive(Debug, Clone)]
pub struct Generation {
    pub answer: String,
    /// Model self-assessed confidence in `[0, 1]`.
    pub confidence: f64,
    /// Chunk ids the model claims to have drawn on. May be empty.
    pub cited_chunk_ids: Vec<String>,
    /// True when the model judged the context insufficient.
    pub missing_information: bool,
    pub usage: Usage,
}

/// Marker error for structured output that failed schema validation.
/// The pipeline downcasts to this to classify the failure.
#[derive(Debug)]
pub struct MalformedOutput(pub String);

impl std::fmt::Display for MalformedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed generator output: {}", self.0)
    }
}

impl std::error::Error for MalformedOutput {}

/// An external capability producing grounded answers.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate an answer for `question` given the assembled `context`
    /// and (already redacted) conversation `history`, oldest first.
    async fn generate(&self, context: &str, question: &str, history: &[String])
        -> Result<Generation>;
}

/// Build the configured generator.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "stub" => Ok(Box::new(StubGenerator)),
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

// ============ Expected response schema ============

/// The JSON object the model is instructed to emit. Anything that does
/// not deserialize into this shape counts as malformed.
#[derive(Debug, Deserialize)]
struct RawGeneration {
    answer: String,
    confidence: f64,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    missing_information: bool,
}

fn validate_generation(content: &str, usage: Usage) -> Result<Generation> {
    let raw: RawGeneration = serde_json::from_str(content.trim())
        .map_err(|e| anyhow!(MalformedOutput(format!("not the expected JSON shape: {}", e))))?;

    if !(0.0..=1.0).contains(&raw.confidence) {
        return Err(anyhow!(MalformedOutput(format!(
            "confidence {} outside [0, 1]",
            raw.confidence
        ))));
    }

    Ok(Generation {
        answer: raw.answer,
        confidence: raw.confidence,
        cited_chunk_ids: raw.citations,
        missing_information: raw.missing_information,
        usage,
    })
}

// ============ Stub generator ============

/// Deterministic offline generator for tests and unconfigured
/// deployments. Echoes whether context was available; never errors.
pub struct StubGenerator;

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(
        &self,
        context: &str,
        question: &str,
        _history: &[String],
    ) -> Result<Generation> {
        let grounded = !context.trim().is_empty();
        let answer = if grounded {
            format!(
                "Based on the indexed documents: {}",
                context.lines().next().unwrap_or_default()
            )
        } else {
            format!(
                "No indexed material matched the question \"{}\".",
                question
            )
        };

        let prompt_tokens = crate::budget::estimate_tokens(context) as u64
            + crate::budget::estimate_tokens(question) as u64;
        let completion_tokens = crate::budget::estimate_tokens(&answer) as u64;

        Ok(Generation {
            answer,
            confidence: if grounded { 0.9 } else { 0.2 },
            cited_chunk_ids: Vec::new(),
            missing_information: !grounded,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }
}

// ============ OpenAI generator ============

const SYSTEM_PROMPT: &str = "You are a knowledge-base assistant. Answer strictly from the \
provided context. Respond with a single JSON object: {\"answer\": string, \"confidence\": \
number in [0,1], \"citations\": [chunk ids actually used], \"missing_information\": bool}. \
Set missing_information to true and say so in the answer when the context does not cover \
the question. Output nothing but the JSON object.";

/// Generator backed by the OpenAI chat completions API.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAiGenerator {
    model: String,
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            client,
            api_key,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(
        &self,
        context: &str,
        question: &str,
        history: &[String],
    ) -> Result<Generation> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": SYSTEM_PROMPT,
        })];
        for turn in history {
            messages.push(serde_json::json!({ "role": "user", "content": turn }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": format!("Context:\n{}\n\nQuestion: {}", context, question),
        }));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "response_format": { "type": "json_object" },
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;

        let usage = Usage {
            prompt_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: json["usage"]["total_tokens"].as_u64().unwrap_or(0),
        };

        let content = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.pointer("/message/content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                anyhow!(MalformedOutput(
                    "missing choices[0].message.content".to_string()
                ))
            })?;

        validate_generation(content, usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_payload_passes_validation() {
        let content = r#"{"answer": "Use the VPN portal.", "confidence": 0.82,
            "citations": ["c1", "c2"], "missing_information": false}"#;
        let gen = validate_generation(content, Usage::default()).unwrap();
        assert_eq!(gen.answer, "Use the VPN portal.");
        assert_eq!(gen.cited_chunk_ids, vec!["c1", "c2"]);
        assert!(!gen.missing_information);
    }

    #[test]
    fn optional_fields_default() {
        let content = r#"{"answer": "ok", "confidence": 0.5}"#;
        let gen = validate_generation(content, Usage::default()).unwrap();
        assert!(gen.cited_chunk_ids.is_empty());
        assert!(!gen.missing_information);
    }

    #[test]
    fn non_json_output_is_malformed() {
        let err = validate_generation("Sure! Here's your answer:", Usage::default()).unwrap_err();
        assert!(err.downcast_ref::<MalformedOutput>().is_some());
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let err = validate_generation(r#"{"confidence": 0.5}"#, Usage::default()).unwrap_err();
        assert!(err.downcast_ref::<MalformedOutput>().is_some());
    }

    #[test]
    fn out_of_range_confidence_is_malformed() {
        let err =
            validate_generation(r#"{"answer": "a", "confidence": 1.7}"#, Usage::default())
                .unwrap_err();
        assert!(err.downcast_ref::<MalformedOutput>().is_some());
    }

    #[tokio::test]
    async fn stub_flags_missing_information_without_context() {
        let gen = StubGenerator
            .generate("", "where is the handbook?", &[])
            .await
            .unwrap();
        assert!(gen.missing_information);
        assert!(gen.confidence < 0.5);
    }

    #[tokio::test]
    async fn stub_grounds_in_context_when_present() {
        let gen = StubGenerator
            .generate("Vacation policy: 25 days.", "how many vacation days?", &[])
            .await
            .unwrap();
        assert!(!gen.missing_information);
        assert!(gen.answer.contains("Vacation policy"));
        assert!(gen.usage.total_tokens > 0);
    }
}
