//! Deployment configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::RetryPolicy;

/// Tunables supplied at deployment time. None of these change the engine's
/// semantics, only its retry budget, backoff curve, and parallelism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum executions of a job before it fails permanently.
    pub max_attempts: u32,

    /// Base delay for the first retry, in milliseconds.
    pub backoff_base_ms: u64,

    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,

    /// Upper bound on any single backoff delay, in milliseconds.
    pub backoff_cap_ms: u64,

    /// Number of concurrent worker loops (>= 1).
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 2_000,
            backoff_multiplier: 2.0,
            backoff_cap_ms: 60_000,
            concurrency: 4,
        }
    }
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.backoff_base_ms),
            multiplier: self.backoff_multiplier,
            max_delay: Duration::from_millis(self.backoff_cap_ms),
            jitter: RetryPolicy::DEFAULT_JITTER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_attempts, 3);
        assert!(cfg.concurrency >= 1);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"concurrency": 1}"#).unwrap();
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.max_attempts, 3);
    }
}
