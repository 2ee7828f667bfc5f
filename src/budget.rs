//! Per-request budget control: one shared deadline and one token ceiling.
//!
//! A [`Budget`] is created once at request entry and threaded by
//! reference through every stage. The deadline is an immutable absolute
//! instant — each stage derives its own remaining time independently, so
//! no countdown state is shared or mutated across suspension points.
//!
//! Stage execution goes through [`Budget::run_stage`], which bounds the
//! stage future with `min(remaining budget, stage max)`. When the bound
//! elapses the stage fails with [`PipelineError::Timeout`] and the
//! still-in-flight operation is detached: a no-op waiter observes and
//! discards its eventual settlement, so a late failure can never surface
//! a second time. The operation does keep running in the background and
//! consuming resources — a deliberate trade-off, since the transports
//! involved offer no true cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Stage};

/// Approximate chars-per-token ratio used for all token estimates.
const CHARS_PER_TOKEN: usize = 4;

/// Smallest timeout ever handed to a stage. A zero or negative timeout
/// is treated as "no timeout" by many primitives, so the floor keeps a
/// final attempt bounded instead of unbounded.
pub const MIN_STAGE_BUDGET: Duration = Duration::from_millis(100);

/// Shared budget for one query: absolute deadline plus token ceiling.
/// Never extended once created.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    deadline: Instant,
    token_ceiling: usize,
    /// The global per-request timeout; also the cap on `remaining`.
    total: Duration,
}

impl Budget {
    /// Start a budget now: deadline = now + the configured total timeout.
    pub fn start(cfg: &PipelineConfig) -> Self {
        let total = Duration::from_millis(cfg.total_timeout_ms);
        Self {
            deadline: Instant::now() + total,
            token_ceiling: cfg.token_ceiling,
            total,
        }
    }

    pub fn token_ceiling(&self) -> usize {
        self.token_ceiling
    }

    /// Time left until the deadline, clamped to
    /// `[MIN_STAGE_BUDGET, total timeout]`.
    ///
    /// The upper clamp caps runaway budgets from a misconfigured
    /// far-future deadline; the lower clamp keeps an already-expired
    /// deadline from producing a non-positive timeout.
    pub fn remaining(&self) -> Duration {
        let left = self.deadline.saturating_duration_since(Instant::now());
        left.min(self.total).max(MIN_STAGE_BUDGET)
    }

    /// True once the deadline has passed; later stages short-circuit on
    /// this rather than starting new external calls.
    pub fn exhausted(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Run one external stage under `min(remaining, stage_max)`.
    ///
    /// The future is spawned so that on timeout it is detached, not
    /// dropped: a background waiter consumes its eventual outcome
    /// (including a panic) so nothing surfaces later.
    pub async fn run_stage<T, F>(
        &self,
        stage: Stage,
        stage_max: Duration,
        fut: F,
    ) -> Result<T, PipelineError>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let allowed = self.remaining().min(stage_max.max(MIN_STAGE_BUDGET));
        let mut handle = tokio::spawn(fut);

        match tokio::time::timeout(allowed, &mut handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(source))) => Err(PipelineError::Upstream { stage, source }),
            Ok(Err(join_err)) => Err(PipelineError::Internal(anyhow::anyhow!(
                "{} stage task failed: {}",
                stage,
                join_err
            ))),
            Err(_elapsed) => {
                // Detach from the in-flight operation; its settlement is
                // observed here and discarded.
                tokio::spawn(async move {
                    match handle.await {
                        Ok(Ok(_)) => {
                            tracing::debug!(%stage, "stage completed after its timeout; result discarded");
                        }
                        Ok(Err(err)) => {
                            tracing::debug!(%stage, error = %err, "stage failed after its timeout; error discarded");
                        }
                        Err(join_err) => {
                            tracing::debug!(%stage, error = %join_err, "stage task ended abnormally after its timeout");
                        }
                    }
                });
                Err(PipelineError::Timeout { stage })
            }
        }
    }
}

/// Deterministic, monotonic token estimate (chars / 4, rounded up).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Return the longest prefix of `text` whose token estimate is within
/// `token_ceiling`. Cuts on a character boundary.
pub fn truncate_to_token_budget(text: &str, token_ceiling: usize) -> String {
    let max_chars = token_ceiling.saturating_mul(CHARS_PER_TOKEN);
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg(total_ms: u64) -> PipelineConfig {
        PipelineConfig {
            total_timeout_ms: total_ms,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn remaining_is_capped_at_the_global_timeout() {
        let mut budget = Budget::start(&test_cfg(5_000));
        // Simulate a misconfigured far-future deadline.
        budget.deadline = Instant::now() + Duration::from_secs(3_600);
        assert_eq!(budget.remaining(), Duration::from_millis(5_000));
    }

    #[tokio::test]
    async fn remaining_is_floored_for_past_deadlines() {
        let mut budget = Budget::start(&test_cfg(5_000));
        budget.deadline = Instant::now() - Duration::from_secs(10);
        assert_eq!(budget.remaining(), MIN_STAGE_BUDGET);
        assert!(budget.exhausted());
    }

    #[test]
    fn token_estimate_is_monotonic() {
        let mut prev = 0;
        let mut text = String::new();
        for _ in 0..64 {
            text.push('x');
            let est = estimate_tokens(&text);
            assert!(est >= prev, "estimate shrank as text grew");
            prev = est;
        }
    }

    #[test]
    fn truncation_respects_the_ceiling() {
        let text = "word ".repeat(500);
        for ceiling in [1usize, 3, 10, 100, 10_000] {
            let truncated = truncate_to_token_budget(&text, ceiling);
            assert!(
                estimate_tokens(&truncated) <= ceiling,
                "estimate {} exceeds ceiling {}",
                estimate_tokens(&truncated),
                ceiling
            );
            assert!(text.starts_with(&truncated));
        }
    }

    #[test]
    fn truncation_is_identity_when_within_budget() {
        let text = "short text";
        assert_eq!(truncate_to_token_budget(text, 100), text);
    }

    #[tokio::test]
    async fn slow_stage_times_out_with_stage_identity() {
        let budget = Budget::start(&test_cfg(10_000));
        let result: Result<u32, _> = budget
            .run_stage(Stage::Embedding, Duration::from_millis(120), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(7)
            })
            .await;
        match result {
            Err(PipelineError::Timeout { stage }) => assert_eq!(stage, Stage::Embedding),
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn late_settlement_after_timeout_is_discarded() {
        let budget = Budget::start(&test_cfg(10_000));
        let result: Result<u32, _> = budget
            .run_stage(Stage::Generation, Duration::from_millis(120), async {
                tokio::time::sleep(Duration::from_millis(250)).await;
                anyhow::bail!("late backend failure")
            })
            .await;
        assert!(matches!(result, Err(PipelineError::Timeout { .. })));

        // Let the detached operation settle; its error must go nowhere.
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    #[tokio::test]
    async fn stage_error_is_wrapped_with_stage_identity() {
        let budget = Budget::start(&test_cfg(10_000));
        let result: Result<u32, _> = budget
            .run_stage(Stage::Retrieval, Duration::from_secs(1), async {
                anyhow::bail!("index unavailable")
            })
            .await;
        match result {
            Err(PipelineError::Upstream { stage, .. }) => assert_eq!(stage, Stage::Retrieval),
            other => panic!("expected upstream error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn stage_max_bounds_a_generous_budget() {
        let budget = Budget::start(&test_cfg(60_000));
        let started = Instant::now();
        let result: Result<(), _> = budget
            .run_stage(Stage::Retrieval, Duration::from_millis(150), async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
