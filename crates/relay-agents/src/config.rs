//! Runtime configuration: defaults, then an optional TOML file, then `RELAY_*`
//! environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use coordination::{BackoffPolicy, LoopLimits, OrchestratorConfig, RetrySettings};
use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {var} has invalid value `{value}`")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL, without the `/chat/completions` suffix.
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".into(),
            api_key: None,
            model: "default".into(),
            request_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Ceiling for a single backoff sleep. No ceiling when unset.
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub max_iterations: u32,
    pub max_error_iterations: u32,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_error_iterations: 10,
        }
    }
}

/// Interpreter used to validate generated code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Command line, split with shell quoting rules. Empty disables execution.
    pub command: String,
    pub timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: "python3".into(),
            timeout_secs: 60,
        }
    }
}

impl ExecutorConfig {
    pub fn is_enabled(&self) -> bool {
        !self.command.trim().is_empty()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub backend: BackendConfig,
    pub retry: RetryConfig,
    pub correction: CorrectionConfig,
    pub max_plan_iterations: u32,
    pub executor: ExecutorConfig,
    /// Session workspaces are allocated under this directory.
    pub output_root: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            retry: RetryConfig::default(),
            correction: CorrectionConfig::default(),
            max_plan_iterations: 3,
            executor: ExecutorConfig::default(),
            output_root: PathBuf::from("./generated_projects"),
        }
    }
}

impl RelayConfig {
    /// Defaults → `path` (if given) → process environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `RELAY_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RELAY_BASE_URL") {
            self.backend.base_url = v;
        }
        if let Some(v) = lookup("RELAY_API_KEY") {
            self.backend.api_key = Some(v);
        }
        if let Some(v) = lookup("RELAY_MODEL") {
            self.backend.model = v;
        }
        if let Some(v) = lookup("RELAY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("RELAY_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("RELAY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_env("RELAY_BASE_DELAY_MS", v)?;
        }
        if let Some(v) = lookup("RELAY_MAX_ITERATIONS") {
            self.correction.max_iterations = parse_env("RELAY_MAX_ITERATIONS", v)?;
        }
        if let Some(v) = lookup("RELAY_MAX_ERROR_ITERATIONS") {
            self.correction.max_error_iterations = parse_env("RELAY_MAX_ERROR_ITERATIONS", v)?;
        }
        if let Some(v) = lookup("RELAY_MAX_PLAN_ITERATIONS") {
            self.max_plan_iterations = parse_env("RELAY_MAX_PLAN_ITERATIONS", v)?;
        }
        if let Some(v) = lookup("RELAY_OUTPUT_ROOT") {
            self.output_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("RELAY_EXECUTOR") {
            self.executor.command = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.base_url is empty".into()));
        }
        if self.backend.model.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.model is empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.executor.is_enabled() && shlex::split(&self.executor.command).is_none() {
            return Err(ConfigError::Invalid(format!(
                "executor.command `{}` has unbalanced quotes",
                self.executor.command
            )));
        }
        Ok(())
    }

    pub fn retry_settings(&self) -> RetrySettings {
        let mut policy = BackoffPolicy::new(Duration::from_millis(self.retry.base_delay_ms));
        if let Some(ceiling) = self.retry.max_delay_ms {
            policy = policy.with_max_delay(Duration::from_millis(ceiling));
        }
        RetrySettings {
            max_attempts: self.retry.max_attempts,
            policy,
        }
    }

    pub fn loop_limits(&self) -> LoopLimits {
        LoopLimits::new(
            self.correction.max_iterations,
            self.correction.max_error_iterations,
        )
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_plan_iterations: self.max_plan_iterations,
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.correction.max_iterations, 10);
        assert_eq!(config.correction.max_error_iterations, 10);
        assert_eq!(config.max_plan_iterations, 3);
        assert_eq!(config.executor.command, "python3");
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let config: RelayConfig = toml::from_str(
            r#"
            max_plan_iterations = 5

            [backend]
            model = "qwen"

            [retry]
            max_attempts = 6
            max_delay_ms = 30000
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.model, "qwen");
        assert_eq!(config.backend.base_url, BackendConfig::default().base_url);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.max_plan_iterations, 5);
        assert_eq!(
            config.retry_settings().policy.max_delay,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn env_overrides_file() {
        let mut config = RelayConfig::default();
        config
            .apply_env(env(&[
                ("RELAY_MODEL", "llama"),
                ("RELAY_MAX_ATTEMPTS", "5"),
                ("RELAY_MAX_ERROR_ITERATIONS", "2"),
                ("RELAY_EXECUTOR", "python3 -I"),
            ]))
            .unwrap();
        assert_eq!(config.backend.model, "llama");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.loop_limits(), LoopLimits::new(10, 2));
        assert_eq!(config.executor.command, "python3 -I");
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = RelayConfig::default();
        let err = config
            .apply_env(env(&[("RELAY_MAX_ATTEMPTS", "three")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: "RELAY_MAX_ATTEMPTS",
                ..
            }
        ));
    }

    #[test]
    fn validate_rejects_zero_attempts_and_empty_url() {
        let mut config = RelayConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.backend.base_url = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_executor_disables_execution() {
        let mut config = RelayConfig::default();
        config.executor.command = String::new();
        assert!(!config.executor.is_enabled());
        config.validate().unwrap();
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "output_root = \"/tmp/out\"\n").unwrap();
        let config = RelayConfig::from_file(&path).unwrap();
        assert_eq!(config.output_root, PathBuf::from("/tmp/out"));
    }
}
