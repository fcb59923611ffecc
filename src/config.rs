//! Ledger and pipeline configuration

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{decimal, Currency, LedgerError, LedgerResult};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Currencies the standard chart of accounts is created for
    pub currencies: Vec<Currency>,
    /// Largest tolerated difference between debits and credits, in currency units
    pub balance_tolerance: BigDecimal,
    /// Post estimated processing fees as an expense leg
    pub post_processing_fees: bool,
    /// Buffer size of the event broadcast channel
    pub event_capacity: usize,
    pub pipeline: PipelineConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            currencies: Currency::defaults(),
            balance_tolerance: decimal(1, 3),
            post_processing_fees: false,
            event_capacity: 1024,
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Transaction processing pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded queue capacity; `submit` waits when the queue is full
    pub queue_capacity: usize,
    /// Number of worker tasks draining the queue
    pub workers: usize,
    /// A transaction processing longer than this is reported as stalled
    pub stall_threshold_secs: u64,
    /// How often the watchdog looks for stalled transactions
    pub stall_check_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 4,
            stall_threshold_secs: 300,
            stall_check_interval_secs: 30,
        }
    }
}

impl PipelineConfig {
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }

    pub fn stall_check_interval(&self) -> Duration {
        Duration::from_secs(self.stall_check_interval_secs.max(1))
    }
}

impl LedgerConfig {
    /// Load configuration from `config/ledger.*` (optional) and
    /// `CREATOR_LEDGER__*` environment variables, falling back to defaults.
    pub fn load() -> LedgerResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/ledger").required(false))
            .add_source(
                config::Environment::with_prefix("CREATOR_LEDGER")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| LedgerError::Config(e.to_string()))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| LedgerError::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> LedgerResult<()> {
        let mut errors = Vec::new();
        if self.pipeline.queue_capacity == 0 {
            errors.push("pipeline.queue_capacity must be at least 1".to_string());
        }
        if self.pipeline.workers == 0 {
            errors.push("pipeline.workers must be at least 1".to_string());
        }
        if self.event_capacity == 0 {
            errors.push("event_capacity must be at least 1".to_string());
        }
        if self.balance_tolerance < BigDecimal::from(0) {
            errors.push("balance_tolerance cannot be negative".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::Config(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.currencies.len(), 4);
        assert_eq!(config.balance_tolerance, "0.001".parse::<BigDecimal>().unwrap());
        assert_eq!(config.pipeline.workers, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = LedgerConfig::default();
        config.pipeline.workers = 0;
        config.pipeline.queue_capacity = 0;
        match config.validate() {
            Err(LedgerError::Config(message)) => {
                assert!(message.contains("workers"));
                assert!(message.contains("queue_capacity"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LedgerConfig =
            serde_json::from_str(r#"{"post_processing_fees": true, "pipeline": {"workers": 2}}"#)
                .unwrap();
        assert!(config.post_processing_fees);
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.pipeline.queue_capacity, 1024);
        assert_eq!(config.currencies, Currency::defaults());
    }

    #[test]
    fn test_load_without_sources_gives_defaults() {
        let config = LedgerConfig::load().unwrap();
        assert_eq!(config.pipeline, PipelineConfig::default());
    }
}
