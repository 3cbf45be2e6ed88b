//! Configuration loading, validation, and management for wardclaw.
//!
//! Loads configuration from `~/.wardclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.wardclaw/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key fallback (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider used when a command does not name one
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used when a command does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Sampling temperature for completions
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Upper bound on tokens per completion
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Retry/backoff behavior for transient provider failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Agent loop budgets
    #[serde(default)]
    pub agent: AgentConfig,

    /// Safety gates: rate limiting, confirmation, undo
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Session persistence
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Scheduled heartbeat runs
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-sonnet-4-5".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Stand-in for secrets in Debug output.
fn redact(s: &Option<String>) -> &'static str {
    if s.is_some() { "[REDACTED]" } else { "unset" }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("retry", &self.retry)
            .field("agent", &self.agent)
            .field("safety", &self.safety)
            .field("sessions", &self.sessions)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

/// Per-provider settings. The `command`/`args` pair only applies to the
/// process-backed provider.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Executable for the process-backed provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments for the process-backed provider.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("command", &self.command)
            .field("args", &self.args)
            .finish()
    }
}

/// Retry/backoff behavior for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before the first retry; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Per-call HTTP timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Agent loop budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum reasoning/acting steps per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Model context window in tokens.
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,

    /// Tokens reserved for the model's response.
    #[serde(default = "default_reserved_response_tokens")]
    pub reserved_response_tokens: usize,

    /// Leading messages never evicted by trimming.
    #[serde(default = "default_pin_first")]
    pub pin_first_messages: usize,

    /// Synthesize a recap turn when trimming evicts history.
    #[serde(default = "default_true")]
    pub summarize_on_trim: bool,

    /// Max characters of action output quoted into an observation.
    #[serde(default = "default_observation_chars")]
    pub max_observation_chars: usize,
}

fn default_max_steps() -> u32 {
    15
}
fn default_context_limit() -> usize {
    100_000
}
fn default_reserved_response_tokens() -> usize {
    4_096
}
fn default_pin_first() -> usize {
    2
}
fn default_observation_chars() -> usize {
    1_500
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            context_limit: default_context_limit(),
            reserved_response_tokens: default_reserved_response_tokens(),
            pin_first_messages: default_pin_first(),
            summarize_on_trim: true,
            max_observation_chars: default_observation_chars(),
        }
    }
}

/// Safety gates: rate limiting, confirmation, undo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Max gateway admissions per window.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: usize,

    /// Sliding-window length in seconds.
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Pre-approve confirmation prompts. Dangerous; off by default.
    #[serde(default)]
    pub auto_confirm: bool,

    /// Walk the gates but skip execution.
    #[serde(default)]
    pub dry_run: bool,

    /// Reversible-operation history capacity.
    #[serde(default = "default_undo_capacity")]
    pub undo_capacity: usize,
}

fn default_rate_limit_max() -> usize {
    10
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_undo_capacity() -> usize {
    50
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            auto_confirm: false,
            dry_run: false,
            undo_capacity: default_undo_capacity(),
        }
    }
}

/// Session persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// SQLite database path. Defaults to `<config dir>/sessions.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,

    /// Persist transcripts automatically after each run.
    #[serde(default = "default_true")]
    pub auto_save: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            auto_save: true,
        }
    }
}

/// Scheduled heartbeat runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Step cap for non-interactive heartbeat runs.
    #[serde(default = "default_heartbeat_max_steps")]
    pub max_steps: u32,
}

fn default_heartbeat_max_steps() -> u32 {
    8
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_steps: default_heartbeat_max_steps(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.wardclaw/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `WARDCLAW_API_KEY` (highest priority)
    /// - `ANTHROPIC_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if config.api_key.is_none() {
            config.api_key = std::env::var("WARDCLAW_API_KEY")
                .ok()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("WARDCLAW_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("WARDCLAW_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from one specific TOML file. A missing file is
    /// not an error: defaults apply until the user writes one.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The configuration directory, `~/.wardclaw`.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".wardclaw")
    }

    /// SQLite database path for sessions.
    pub fn sessions_db_path(&self) -> PathBuf {
        match &self.sessions.db_path {
            Some(p) => PathBuf::from(p),
            None => Self::config_dir().join("sessions.db"),
        }
    }

    /// Legacy flat-file session directory (pre-SQLite format).
    pub fn legacy_sessions_dir() -> PathBuf {
        Self::config_dir().join("history")
    }

    /// Audit log file path.
    pub fn audit_log_path() -> PathBuf {
        Self::config_dir().join("audit.json")
    }

    /// Reversible-operation history file path.
    pub fn undo_log_path() -> PathBuf {
        Self::config_dir().join("undo.json")
    }

    /// Stash directory for delete backups.
    pub fn trash_dir() -> PathBuf {
        Self::config_dir().join("trash")
    }

    /// Heartbeat task definitions file path.
    pub fn heartbeat_tasks_path() -> PathBuf {
        Self::config_dir().join("heartbeat.json")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.safety.rate_limit_max == 0 || self.safety.rate_limit_window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit_max and rate_limit_window_secs must be > 0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be > 0".into(),
            ));
        }

        if self.agent.context_limit <= self.agent.reserved_response_tokens {
            return Err(ConfigError::ValidationError(
                "agent.context_limit must exceed agent.reserved_response_tokens".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// API key for a named provider: per-provider entry first, then the
    /// global fallback.
    pub fn provider_api_key(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Model for a named provider: per-provider default, then the global
    /// default model.
    pub fn provider_model(&self, provider: &str) -> String {
        self.providers
            .get(provider)
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The default configuration rendered as TOML, for `config init`.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            retry: RetryConfig::default(),
            agent: AgentConfig::default(),
            safety: SafetyConfig::default(),
            sessions: SessionsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// The user's home directory, with a harmless fallback when unset.
fn dirs_home() -> PathBuf {
    let (var, fallback) = if cfg!(target_os = "windows") {
        ("USERPROFILE", "C:\\Users\\Default")
    } else {
        ("HOME", "/tmp")
    };
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(fallback))
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, "anthropic");
        assert_eq!(config.safety.rate_limit_max, 10);
        assert_eq!(config.safety.rate_limit_window_secs, 60);
        assert!(!config.safety.auto_confirm);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.agent.max_steps, config.agent.max_steps);
        assert_eq!(parsed.safety.undo_capacity, config.safety.undo_capacity);
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let config = AppConfig {
            default_temperature: 3.5,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_rate_limit_rejected() {
        let mut config = AppConfig::default();
        config.safety.rate_limit_max = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn context_limit_must_exceed_reserve() {
        let mut config = AppConfig::default();
        config.agent.context_limit = 1000;
        config.agent.reserved_response_tokens = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.default_provider, "anthropic");
    }

    #[test]
    fn provider_key_falls_back_to_global() {
        let mut config = AppConfig {
            api_key: Some("global-key".into()),
            ..AppConfig::default()
        };
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("openai-key".into()),
                ..ProviderConfig::default()
            },
        );

        assert_eq!(
            config.provider_api_key("openai").as_deref(),
            Some("openai-key")
        );
        assert_eq!(
            config.provider_api_key("anthropic").as_deref(),
            Some("global-key")
        );
    }

    #[test]
    fn provider_model_override() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                default_model: Some("gpt-4o-mini".into()),
                ..ProviderConfig::default()
            },
        );
        assert_eq!(config.provider_model("openai"), "gpt-4o-mini");
        assert_eq!(config.provider_model("anthropic"), "claude-sonnet-4-5");
    }

    #[test]
    fn process_provider_config_parses() {
        let toml_str = r#"
[providers.local]
command = "/usr/local/bin/llm-cli"
args = ["--quiet"]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let local = config.providers.get("local").unwrap();
        assert_eq!(local.command.as_deref(), Some("/usr/local/bin/llm-cli"));
        assert_eq!(local.args, vec!["--quiet"]);
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("anthropic"));
        assert!(toml_str.contains("max_steps"));
    }
}
