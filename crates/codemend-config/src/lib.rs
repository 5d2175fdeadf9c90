//! Configuration loading for the codemend control plane.
//!
//! A single YAML file configures the server, the durable store, the two
//! egress clients, the scheduler, and the agent loop. Every section has
//! working defaults so a bare `{}` file boots the in-memory development
//! setup.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            executor: ExecutorConfig::default(),
            llm: LlmConfig::default(),
            scheduler: SchedulerConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// "memory" or "postgres"
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default)]
    pub connection_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            connection_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default = "default_executor_base_url")]
    pub base_url: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: default_executor_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Environment variable holding the API key; never stored in the file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tick_ms: default_tick_ms(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_max_observation_chars")]
    pub max_observation_chars: usize,
    #[serde(default = "default_code_timeout_secs")]
    pub code_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_observation_chars: default_max_observation_chars(),
            code_timeout_secs: default_code_timeout_secs(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_executor_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_llm_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_llm_model() -> String {
    "claude-sonnet-4-6".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

fn default_tick_ms() -> u64 {
    2_000
}

fn default_reap_interval_secs() -> u64 {
    60
}

fn default_max_turns() -> u32 {
    20
}

fn default_max_observation_chars() -> usize {
    8_000
}

fn default_code_timeout_secs() -> u64 {
    300
}

/// Load the full configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<ControlConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ControlConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ControlConfig) -> Result<(), ConfigError> {
    if config.server.listen.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "server.listen must not be empty".to_string(),
        ));
    }

    match config.store.backend.trim().to_ascii_lowercase().as_str() {
        "memory" | "in_memory" => {}
        "postgres" | "postgresql" | "pgsql" => {
            if config
                .store
                .connection_url
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
            {
                return Err(ConfigError::Invalid(
                    "store.connection_url is required for the postgres backend".to_string(),
                ));
            }
        }
        backend => {
            return Err(ConfigError::Invalid(format!(
                "store.backend '{backend}' is not supported"
            )));
        }
    }

    if config.executor.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "executor.base_url must not be empty".to_string(),
        ));
    }
    if config.llm.model.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "llm.model must not be empty".to_string(),
        ));
    }
    if config.scheduler.workers == 0 {
        return Err(ConfigError::Invalid(
            "scheduler.workers must be > 0".to_string(),
        ));
    }
    if config.scheduler.tick_ms == 0 {
        return Err(ConfigError::Invalid(
            "scheduler.tick_ms must be > 0".to_string(),
        ));
    }
    if config.agent.max_turns == 0 {
        return Err(ConfigError::Invalid(
            "agent.max_turns must be > 0".to_string(),
        ));
    }
    if config.agent.max_observation_chars == 0 {
        return Err(ConfigError::Invalid(
            "agent.max_observation_chars must be > 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<ControlConfig, ConfigError> {
        let config: ControlConfig = serde_yaml::from_str(yaml)?;
        validate_config(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = parse("{}").expect("defaults");
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(config.scheduler.tick_ms, 2_000);
        assert_eq!(config.agent.max_turns, 20);
        assert_eq!(config.agent.max_observation_chars, 8_000);
        assert_eq!(config.agent.code_timeout_secs, 300);
    }

    #[test]
    fn test_postgres_backend_requires_connection_url() {
        let err = parse("store:\n  backend: postgres\n").expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = parse(
            "store:\n  backend: postgres\n  connection_url: postgres://localhost/codemend\n",
        )
        .expect("valid");
        assert_eq!(config.store.backend, "postgres");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = parse("store:\n  backend: mongodb\n").expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = parse("scheduler:\n  workers: 0\n").expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
