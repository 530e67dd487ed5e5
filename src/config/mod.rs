use serde::Deserialize;
use std::time::Duration;

use crate::services::{classifier::RetryPolicy, worker::WorkerSettings};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the work queue
    pub redis_url: String,

    /// Key prefix for the work queue in Redis
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Google Generative Language API key
    pub gemini_api_key: String,

    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,

    /// Per-request timeout for engine calls
    #[serde(default = "default_gemini_timeout_secs")]
    pub gemini_timeout_secs: u64,

    /// Engine attempts before a rate-limited classification gives up
    #[serde(default = "default_classify_max_retries")]
    pub classify_max_retries: u32,

    #[serde(default = "default_classify_initial_delay_secs")]
    pub classify_initial_delay_secs: u64,

    /// Words of comment text forwarded to the engine
    #[serde(default = "default_word_limit")]
    pub word_limit: usize,

    /// How long a received message stays hidden while it is processed
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// How long a message stays hidden after a failed classification
    #[serde(default = "default_failure_visibility_secs")]
    pub failure_visibility_secs: u64,

    /// Deliveries before a failing job is marked failed (0 = never)
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Age after which a pending, never-enqueued job is re-enqueued
    #[serde(default = "default_reconcile_staleness_secs")]
    pub reconcile_staleness_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_queue_name() -> String {
    "moderation".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-pro".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_timeout_secs() -> u64 {
    60
}

fn default_classify_max_retries() -> u32 {
    10
}

fn default_classify_initial_delay_secs() -> u64 {
    5
}

fn default_word_limit() -> usize {
    crate::services::prompt::DEFAULT_WORD_LIMIT
}

fn default_visibility_timeout_secs() -> u64 {
    3600
}

fn default_failure_visibility_secs() -> u64 {
    3600
}

fn default_max_receive_count() -> u32 {
    5
}

fn default_worker_batch_size() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

fn default_reconcile_staleness_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which the worker cannot make progress or would
    /// lose its lease on a message it is still classifying.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classify_max_retries == 0 {
            return Err(ConfigError::Invalid(
                "CLASSIFY_MAX_RETRIES must be at least 1".to_string(),
            ));
        }
        if self.worker_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "WORKER_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        let worst_case = self.worst_case_item_secs();
        if worst_case >= self.visibility_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "VISIBILITY_TIMEOUT_SECS ({}) must exceed the worst-case time to classify one comment ({worst_case}s); \
                 lower CLASSIFY_MAX_RETRIES, CLASSIFY_INITIAL_DELAY_SECS or GEMINI_TIMEOUT_SECS",
                self.visibility_timeout_secs
            )));
        }
        Ok(())
    }

    /// Upper bound on one classification: every attempt times out and every
    /// backoff sleep between attempts is taken.
    pub fn worst_case_item_secs(&self) -> u64 {
        let attempts = u64::from(self.classify_max_retries);
        let backoff = self
            .classify_initial_delay_secs
            .saturating_mul(2u64.saturating_pow(self.classify_max_retries.saturating_sub(1)) - 1);
        backoff.saturating_add(attempts.saturating_mul(self.gemini_timeout_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.classify_max_retries,
            initial_delay: Duration::from_secs(self.classify_initial_delay_secs),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            failure_visibility: Duration::from_secs(self.failure_visibility_secs),
            max_receive_count: self.max_receive_count,
            lease: self.visibility_timeout(),
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn gemini_timeout(&self) -> Duration {
        Duration::from_secs(self.gemini_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
