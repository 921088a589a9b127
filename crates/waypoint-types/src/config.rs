//! Engine configuration types.
//!
//! `EngineConfig` represents `waypoint.toml` in the data directory. Every
//! field has a default so an empty or missing file yields a usable engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ceiling on concurrently active executions (pending + running).
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,

    /// Budget ceiling in USD applied when neither the submission nor the
    /// definition sets one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_budget_usd: Option<f64>,

    /// Runtime cap on node visits per execution, and the validation bound
    /// on worst-case visits for acyclic definitions.
    #[serde(default = "default_max_node_visits")]
    pub max_node_visits: u32,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub node: NodeSettings,

    #[serde(default)]
    pub checkpoint: CheckpointSettings,

    #[serde(default)]
    pub tracker: TrackerSettings,

    /// Model pricing used to cost calls that report tokens but no cost.
    #[serde(default)]
    pub pricing: Vec<ModelPricing>,
}

fn default_max_concurrent_executions() -> usize {
    16
}

fn default_max_node_visits() -> u32 {
    200
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: default_max_concurrent_executions(),
            default_budget_usd: None,
            max_node_visits: default_max_node_visits(),
            retry: RetrySettings::default(),
            node: NodeSettings::default(),
            checkpoint: CheckpointSettings::default(),
            tracker: TrackerSettings::default(),
            pricing: Vec::new(),
        }
    }
}

/// Backoff between node attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Per-attempt timeout for nodes that do not set `timeout_secs`.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Upper bound on context-provider retrieval before a node runs.
    #[serde(default = "default_context_timeout_ms")]
    pub context_timeout_ms: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_context_timeout_ms() -> u64 {
    2_000
}

impl NodeSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn context_timeout(&self) -> Duration {
        Duration::from_millis(self.context_timeout_ms)
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            context_timeout_ms: default_context_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSettings {
    /// Lifetime of a checkpoint after its last write (default 7 days).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Lifetime of a checkpoint once its execution is terminal.
    #[serde(default = "default_ttl_secs")]
    pub terminal_retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Write attempts before a checkpoint failure becomes fatal.
    #[serde(default = "default_persist_attempts")]
    pub persist_attempts: u32,
    #[serde(default = "default_persist_base_delay_ms")]
    pub persist_base_delay_ms: u64,
}

fn default_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    3_600
}

fn default_persist_attempts() -> u32 {
    3
}

fn default_persist_base_delay_ms() -> u64 {
    100
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            terminal_retention_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            persist_attempts: default_persist_attempts(),
            persist_base_delay_ms: default_persist_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSettings {
    /// How long terminal executions stay queryable in the tracker.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

fn default_grace_period_secs() -> u64 {
    300
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

/// Cost information for a model pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Glob-like pattern for matching model names (e.g., "claude-sonnet-*").
    pub model_pattern: String,
    /// Cost per million input tokens in USD.
    pub input_cost_per_million: f64,
    /// Cost per million output tokens in USD.
    pub output_cost_per_million: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_executions, 16);
        assert_eq!(config.max_node_visits, 200);
        assert_eq!(config.checkpoint.ttl_secs, 604_800);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert!(config.default_budget_usd.is_none());
        assert!(config.pricing.is_empty());
    }

    #[test]
    fn test_engine_config_deserialize_empty() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_concurrent_executions, 16);
        assert_eq!(config.tracker.grace_period_secs, 300);
        assert_eq!(config.node.default_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_engine_config_deserialize_partial_sections() {
        let toml_str = r#"
max_concurrent_executions = 4
default_budget_usd = 12.5

[retry]
base_delay_ms = 50

[checkpoint]
ttl_secs = 60

[[pricing]]
model_pattern = "claude-sonnet-*"
input_cost_per_million = 3.0
output_cost_per_million = 15.0
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_concurrent_executions, 4);
        assert_eq!(config.default_budget_usd, Some(12.5));
        assert_eq!(config.retry.base_delay_ms, 50);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.checkpoint.ttl_secs, 60);
        assert_eq!(config.checkpoint.persist_attempts, 3);
        assert_eq!(config.pricing.len(), 1);
        assert_eq!(config.pricing[0].model_pattern, "claude-sonnet-*");
    }
}
