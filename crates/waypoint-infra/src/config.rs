//! Engine configuration loader for Waypoint.
//!
//! Reads `waypoint.toml` from the data directory (`~/.waypoint/` by default)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use waypoint_types::config::EngineConfig;

/// File name of the engine config inside the data directory.
pub const CONFIG_FILE: &str = "waypoint.toml";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "WAYPOINT_DATA_DIR";

/// Resolve the data directory: `WAYPOINT_DATA_DIR`, else `~/.waypoint`.
pub fn resolve_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".waypoint")
}

/// Load engine configuration from `{data_dir}/waypoint.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparseable file: logs a warning and returns the default.
/// - Otherwise the parsed config, with out-of-range values clamped.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => sanitize(config),
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

fn sanitize(mut config: EngineConfig) -> EngineConfig {
    if config.max_concurrent_executions == 0 {
        tracing::warn!("max_concurrent_executions must be at least 1, using 1");
        config.max_concurrent_executions = 1;
    }
    if config.max_node_visits == 0 {
        tracing::warn!("max_node_visits must be at least 1, using 1");
        config.max_node_visits = 1;
    }
    if !(config.retry.multiplier.is_finite() && config.retry.multiplier >= 1.0) {
        tracing::warn!(multiplier = config.retry.multiplier, "retry multiplier below 1.0, using 1.0");
        config.retry.multiplier = 1.0;
    }
    if config.default_budget_usd.is_some_and(|b| !b.is_finite() || b < 0.0) {
        tracing::warn!("default_budget_usd must be a non-negative number, ignoring it");
        config.default_budget_usd = None;
    }
    config
}
