use async_trait::async_trait;
use garde::Validate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::models::moderation::{Category, CategoryScore, ClassificationResult, Decision};
use crate::services::prompt;

/// An external text-generation engine that answers moderation prompts.
#[async_trait]
pub trait ModerationModel: Send + Sync {
    /// Send `prompt` and return the raw reply text.
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

/// How an engine invocation failed.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Transient overload; the call may be retried after a delay.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The engine refused to process the prompt.
    #[error("Prompt blocked: {0}")]
    Blocked(String),

    #[error("Engine call failed: {0}")]
    Other(String),
}

/// A classification that produced no verdict. The job stays pending.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Unparseable engine reply: {0}")]
    Unparseable(String),

    #[error("Unexpected engine failure: {0}")]
    Unexpected(String),

    #[error("Rate limited on all {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Exponential backoff applied to rate-limited engine calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Engine reply as parsed from JSON, before it is trusted.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    decision: Decision,
    categories: Vec<RawCategory>,
}

#[derive(Debug, Deserialize, Validate)]
struct RawCategory {
    #[garde(length(min = 1, max = 64))]
    label: String,
    #[garde(length(min = 1, max = 8))]
    code: String,
    #[garde(custom(unit_interval))]
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    confidence: Decimal,
    #[garde(skip)]
    matched_text: String,
}

fn unit_interval(value: &Decimal, _: &()) -> garde::Result {
    if (Decimal::ZERO..=Decimal::ONE).contains(value) {
        Ok(())
    } else {
        Err(garde::Error::new("confidence must be between 0 and 1"))
    }
}

/// Turns untrusted comment text into a validated [`ClassificationResult`].
pub struct Classifier {
    model: Arc<dyn ModerationModel>,
    retry: RetryPolicy,
    word_limit: usize,
}

impl Classifier {
    pub fn new(model: Arc<dyn ModerationModel>, retry: RetryPolicy, word_limit: usize) -> Self {
        Self {
            model,
            retry,
            word_limit,
        }
    }

    /// Classify a comment.
    ///
    /// Rate-limited calls are retried up to `max_retries` attempts, doubling
    /// the delay after each one. An engine refusal is a successful `block`
    /// verdict, not an error.
    pub async fn classify(&self, text: &str) -> Result<ClassificationResult, ClassifyError> {
        let request = prompt::build(text, self.word_limit);
        let mut delay = self.retry.initial_delay;
        let mut attempts = 0;

        while attempts < self.retry.max_retries {
            attempts += 1;
            match self.model.generate(&request).await {
                Ok(reply) => return parse_reply(&reply),
                Err(ModelError::Blocked(reason)) => {
                    tracing::warn!(reason = %reason, "Prompt blocked by engine safety settings");
                    return Ok(ClassificationResult::blocked());
                }
                Err(ModelError::RateLimited(detail)) => {
                    metrics::counter!("moderation_rate_limited_total").increment(1);
                    if attempts == self.retry.max_retries {
                        break;
                    }
                    tracing::warn!(
                        attempt = attempts,
                        delay_secs = delay.as_secs_f64(),
                        detail = %detail,
                        "Rate limit hit, backing off"
                    );
                    sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(ModelError::Other(detail)) => {
                    tracing::error!(error = %detail, "Unexpected engine error");
                    return Err(ClassifyError::Unexpected(detail));
                }
            }
        }

        tracing::error!(attempts, "Max retries reached for engine, giving up");
        Err(ClassifyError::Exhausted { attempts })
    }
}

/// Parse and strictly validate an engine reply.
///
/// Requires exactly one entry per known category, each labelled with its
/// category's name. Entries are returned in canonical order with canonical
/// labels, and the decision is recomputed from the scores.
pub fn parse_reply(reply: &str) -> Result<ClassificationResult, ClassifyError> {
    let payload = prompt::strip_fences(reply);
    let raw: RawVerdict = serde_json::from_str(payload).map_err(|e| {
        tracing::error!(error = %e, reply = %reply, "Failed to decode JSON from engine reply");
        ClassifyError::Unparseable(e.to_string())
    })?;

    if raw.categories.len() != Category::ALL.len() {
        return Err(ClassifyError::Unparseable(format!(
            "expected {} categories, got {}",
            Category::ALL.len(),
            raw.categories.len()
        )));
    }

    let mut seen = HashSet::new();
    let mut scored = Vec::with_capacity(raw.categories.len());
    for entry in raw.categories {
        entry
            .validate()
            .map_err(|e| ClassifyError::Unparseable(format!("category {}: {e}", entry.code)))?;
        let category = Category::from_str(entry.code.trim())
            .map_err(|_| ClassifyError::Unparseable(format!("unknown code {:?}", entry.code)))?;
        if !seen.insert(category) {
            return Err(ClassifyError::Unparseable(format!(
                "duplicate code {:?}",
                entry.code
            )));
        }
        if !entry.label.trim().eq_ignore_ascii_case(category.label()) {
            return Err(ClassifyError::Unparseable(format!(
                "label {:?} does not match code {}",
                entry.label,
                category.code()
            )));
        }
        scored.push((
            category,
            CategoryScore {
                label: category.label().to_string(),
                code: category.code(),
                confidence: entry.confidence,
                matched_text: entry.matched_text,
            },
        ));
    }
    scored.sort_by_key(|(category, _)| category.ordinal());

    let result =
        ClassificationResult::from_scores(scored.into_iter().map(|(_, score)| score).collect());
    if raw.decision != result.decision {
        tracing::warn!(
            engine = ?raw.decision,
            derived = ?result.decision,
            "Engine decision disagrees with its scores, using derived decision"
        );
    }
    Ok(result)
}
