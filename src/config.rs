//! Runtime configuration
//!
//! Configuration for limits and logging, loadable from a JSON file or from
//! the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SHADOW_MAX_AGENT_INVOKES` | `limits.maxAgentInvokes` |
//! | `SHADOW_MAX_TOKENS` | `limits.maxTokens` |
//! | `SHADOW_TIMEOUT_MS` | `limits.timeout` |
//! | `SHADOW_LOG` | `log.filter` |
//! | `SHADOW_LOG_DIR` | `log.directory` |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{ContextLimits, RuntimeError, RuntimeResult};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// File name prefix of the rolling log files
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "shadow-agent-runtime.log".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            directory: None,
            file_prefix: default_file_prefix(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Set the filter directives
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Also write daily rolling files into `directory`
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Set the log file prefix
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Emit JSON lines
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Limits of root contexts built from this configuration
    #[serde(default)]
    pub limits: ContextLimits,

    /// Logging
    #[serde(default)]
    pub log: LogConfig,
}

impl RuntimeConfig {
    /// Set the limits
    pub fn with_limits(mut self, limits: ContextLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the logging configuration
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Read the configuration from the process environment
    pub fn from_env() -> RuntimeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, unset variables keep their
    /// defaults
    pub fn from_lookup<F>(lookup: F) -> RuntimeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.limits.max_agent_invokes = parse_u64(&lookup, "SHADOW_MAX_AGENT_INVOKES")?;
        config.limits.max_tokens = parse_u64(&lookup, "SHADOW_MAX_TOKENS")?;
        config.limits.timeout_ms = parse_u64(&lookup, "SHADOW_TIMEOUT_MS")?;

        if let Some(filter) = lookup("SHADOW_LOG").filter(|v| !v.trim().is_empty()) {
            config.log.filter = filter;
        }
        if let Some(dir) = lookup("SHADOW_LOG_DIR").filter(|v| !v.trim().is_empty()) {
            config.log.directory = Some(PathBuf::from(dir));
        }

        tracing::debug!("[Config] Loaded from environment: {:?}", config.limits);
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            RuntimeError::config(format!("failed to read {}: {}", path.display(), err))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|err| {
            RuntimeError::config(format!("invalid config {}: {}", path.display(), err))
        })?;

        tracing::debug!("[Config] Loaded {}", path.display());
        Ok(config)
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> RuntimeResult<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
            RuntimeError::config(format!("{key} must be a non-negative integer, got '{raw}'"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_reads_limits() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("SHADOW_MAX_AGENT_INVOKES", "5"),
            ("SHADOW_MAX_TOKENS", " 1000 "),
            ("SHADOW_TIMEOUT_MS", "250"),
            ("SHADOW_LOG", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.limits.max_agent_invokes, Some(5));
        assert_eq!(config.limits.max_tokens, Some(1000));
        assert_eq!(config.limits.timeout_ms, Some(250));
        assert_eq!(config.log.filter, "debug");
        assert!(config.log.directory.is_none());
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let err = RuntimeConfig::from_lookup(lookup(&[("SHADOW_MAX_TOKENS", "lots")])).unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
        assert!(err.to_string().contains("SHADOW_MAX_TOKENS"));

        let err = RuntimeConfig::from_lookup(lookup(&[("SHADOW_TIMEOUT_MS", "-1")])).unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }

    #[test]
    fn test_empty_environment_is_unbounded() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.limits.is_unbounded());
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"limits": {{"maxAgentInvokes": 3, "timeout": 100}}, "log": {{"filter": "warn", "json": true}}}}"#
        )
        .unwrap();

        let config = RuntimeConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.limits.max_agent_invokes, Some(3));
        assert_eq!(config.limits.timeout_ms, Some(100));
        assert_eq!(config.limits.max_tokens, None);
        assert_eq!(config.log.filter, "warn");
        assert!(config.log.json);
        assert_eq!(config.log.file_prefix, "shadow-agent-runtime.log");
    }

    #[test]
    fn test_from_json_file_errors() {
        let err = RuntimeConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = RuntimeConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }
}
