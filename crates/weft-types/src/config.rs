//! Runtime configuration for weft.
//!
//! `RuntimeConfig` represents the `weft.toml` that tunes template resolution,
//! retry defaults, run timeouts and routing strictness.

use serde::{Deserialize, Serialize};

/// How unresolved references inside interpolated strings are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Any unresolved reference raises.
    #[default]
    Strict,
    /// Unresolved interpolated references stay as literal text and produce a
    /// warning. Whole-value references still raise.
    Permissive,
}

/// Top-level runtime configuration. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub template_resolution_mode: ResolutionMode,

    /// Total attempts for nodes without a `retry` block.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Fixed wait between attempts for nodes without a `retry` block.
    #[serde(default)]
    pub default_retry_wait_ms: u64,

    /// Wall-clock limit for a whole run. `None` disables the limit.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    /// Fail the run instead of halting when an action label has no edge.
    #[serde(default)]
    pub strict_routing: bool,

    /// Concurrency limit for parallel batches that do not set their own.
    #[serde(default = "default_batch_max_concurrent")]
    pub batch_max_concurrent: usize,
}

fn default_max_retries() -> u32 {
    1
}

fn default_batch_max_concurrent() -> usize {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            template_resolution_mode: ResolutionMode::default(),
            default_max_retries: default_max_retries(),
            default_retry_wait_ms: 0,
            run_timeout_secs: None,
            strict_routing: false,
            batch_max_concurrent: default_batch_max_concurrent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_default_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.template_resolution_mode, ResolutionMode::Strict);
        assert_eq!(config.default_max_retries, 1);
        assert_eq!(config.default_retry_wait_ms, 0);
        assert!(config.run_timeout_secs.is_none());
        assert!(!config.strict_routing);
        assert_eq!(config.batch_max_concurrent, 10);
    }

    #[test]
    fn test_runtime_config_deserialize_empty() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_runtime_config_deserialize_with_values() {
        let toml_str = r#"
template_resolution_mode = "permissive"
default_max_retries = 3
default_retry_wait_ms = 250
run_timeout_secs = 60
strict_routing = true
"#;
        let config: RuntimeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.template_resolution_mode, ResolutionMode::Permissive);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.default_retry_wait_ms, 250);
        assert_eq!(config.run_timeout_secs, Some(60));
        assert!(config.strict_routing);
        assert_eq!(config.batch_max_concurrent, 10);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let result = toml::from_str::<RuntimeConfig>(r#"template_resolution_mode = "lenient""#);
        assert!(result.is_err());
    }
}
