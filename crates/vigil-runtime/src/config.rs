//! Control-plane configuration with deep merge and environment
//! overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GuidanceConfig::default()`]
//! 2. If a settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)
//!
//! Configuration is immutable during a run; a reload only affects runs
//! started afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use vigil_core::errors::{GuidanceError, Result};

/// All recognized options with their defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuidanceConfig {
    /// Cap on constitution rendering.
    pub max_constitution_lines: usize,
    /// Retrieval count.
    pub top_k: usize,
    /// Additive score when the detected intent matches a shard tag.
    pub intent_boost: f32,
    /// Additive score for critical-risk shards.
    pub risk_boost_critical: f32,
    /// Additive score for high-risk shards.
    pub risk_boost_high: f32,
    /// Additive score for medium-risk shards.
    pub risk_boost_medium: f32,
    /// Warn threshold for edit size in lines.
    pub diff_size_threshold: usize,
    /// Replace the default destructive patterns.
    pub destructive_patterns: Option<Vec<String>>,
    /// Extend the default destructive patterns.
    pub extra_destructive_patterns: Vec<String>,
    /// Replace the default secret patterns.
    pub secret_patterns: Option<Vec<String>>,
    /// Extend the default secret patterns.
    pub extra_secret_patterns: Vec<String>,
    /// Tool allowlist; absent disables the gate.
    pub allowed_tools: Option<Vec<String>>,
    /// Consecutive A/B wins required for promotion.
    pub promotion_wins: u32,
    /// Optimizer breadth per cycle.
    pub top_violations_per_cycle: usize,
    /// Minimum relative rework reduction for a win.
    pub improvement_threshold: f64,
    /// Maximum tolerated risk increase for a win.
    pub max_risk_increase: f64,
    /// Cycle skip floor.
    pub min_events_for_optimization: usize,
    /// Rework-ratio ceiling for the diff-quality evaluator.
    pub max_rework_ratio: f64,
    /// Patterns for the forbidden-command evaluator.
    pub forbidden_command_patterns: Vec<String>,
    /// Tokens for the forbidden-dependency evaluator.
    pub forbidden_dependency_tokens: Vec<String>,
    /// Minimum log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for `events.log`, `adrs.log`, `manifest.json`, and
    /// `tracker.json`. In-memory only when absent.
    pub state_dir: Option<PathBuf>,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            max_constitution_lines: 60,
            top_k: 5,
            intent_boost: 0.15,
            risk_boost_critical: 0.10,
            risk_boost_high: 0.07,
            risk_boost_medium: 0.05,
            diff_size_threshold: 300,
            destructive_patterns: None,
            extra_destructive_patterns: Vec::new(),
            secret_patterns: None,
            extra_secret_patterns: Vec::new(),
            allowed_tools: None,
            promotion_wins: 2,
            top_violations_per_cycle: 3,
            improvement_threshold: 0.10,
            max_risk_increase: 0.05,
            min_events_for_optimization: 10,
            max_rework_ratio: 0.30,
            forbidden_command_patterns: Vec::new(),
            forbidden_dependency_tokens: Vec::new(),
            log_level: "warn".to_owned(),
            state_dir: None,
        }
    }
}

impl GuidanceConfig {
    /// Load configuration from a JSON settings file with env overrides.
    ///
    /// A missing file yields the defaults; invalid JSON is a
    /// configuration error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let defaults = serde_json::to_value(Self::default())
            .map_err(|e| GuidanceError::config(format!("unserializable defaults: {e}")))?;

        let merged = if path.exists() {
            debug!(?path, "loading guidance config from file");
            let content = std::fs::read_to_string(path)
                .map_err(|e| GuidanceError::persistence(path.display().to_string(), e))?;
            let user: Value = serde_json::from_str(&content)
                .map_err(|e| GuidanceError::config(format!("invalid config JSON: {e}")))?;
            deep_merge(defaults, user)
        } else {
            debug!(?path, "config file not found, using defaults");
            defaults
        };

        let mut config: Self = serde_json::from_value(merged)
            .map_err(|e| GuidanceError::config(format!("invalid config value: {e}")))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("VIGIL_TOP_K") {
            if let Ok(top_k) = value.parse() {
                self.top_k = top_k;
            }
        }
        if let Ok(value) = std::env::var("VIGIL_DIFF_THRESHOLD") {
            if let Ok(threshold) = value.parse() {
                self.diff_size_threshold = threshold;
            }
        }
        if let Ok(value) = std::env::var("VIGIL_LOG_LEVEL") {
            self.log_level = value;
        }
    }

    /// Path of a state file under `state_dir`, when persistence is on.
    #[must_use]
    pub fn state_file(&self, name: &str) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|dir| dir.join(name))
    }
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
