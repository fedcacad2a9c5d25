pub mod validation;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(
        default = "default_runtime_max_blocking_threads",
        skip_serializing_if = "Option::is_none"
    )]
    pub runtime_max_blocking_threads: Option<usize>,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_reuse_port_listener_count: Option<usize>,
    /// Ends a relayed stream when the upstream stays silent this long.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_idle_timeout_secs: Option<u64>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
#[allow(clippy::unnecessary_wraps)]
fn default_runtime_max_blocking_threads() -> Option<usize> {
    Some(8)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
            runtime_max_blocking_threads: default_runtime_max_blocking_threads(),
            base_path: String::new(),
            http_use_env_proxy: false,
            tcp_reuse_port_listener_count: None,
            stream_idle_timeout_secs: None,
        }
    }
}

/// Upstream completion API and the sampling defaults applied to each request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub frequency_penalty: f64,
    #[serde(default)]
    pub presence_penalty: f64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f64 {
    0.6
}
fn default_max_tokens() -> u32 {
    128
}
fn default_top_p() -> f64 {
    1.0
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            proxy: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

/// Encrypted credential cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_user_id_cookie")]
    pub user_id_cookie: String,
    /// Base64-encoded 32-byte key. Takes precedence over `encryption_key_env`.
    #[serde(default, skip_serializing)]
    pub encryption_key: Option<String>,
    #[serde(default = "default_encryption_key_env")]
    pub encryption_key_env: String,
    #[serde(default = "default_true")]
    pub secure_cookie: bool,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_cookie_name() -> String {
    "chatgpt-api".to_string()
}
fn default_user_id_cookie() -> String {
    "chatgpt-user-id".to_string()
}
fn default_encryption_key_env() -> String {
    "SESSION_ENCRYPTION_KEY".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_age_secs() -> u64 {
    14 * 24 * 60 * 60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            user_id_cookie: default_user_id_cookie(),
            encryption_key: None,
            encryption_key_env: default_encryption_key_env(),
            secure_cookie: true,
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl SessionConfig {
    /// Resolve the configured key material, reading the environment when no
    /// inline key is set.
    #[must_use]
    pub fn resolve_encryption_key(&self) -> Option<String> {
        if let Some(key) = self.encryption_key.as_deref() {
            if !key.trim().is_empty() {
                return Some(key.trim().to_string());
            }
        }
        std::env::var(&self.encryption_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_history_limit() -> usize {
    10
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            history_limit: default_history_limit(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Role presets, merged over the built-in table.
    #[serde(default)]
    pub roles: FxHashMap<String, String>,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.upstream.model, "gpt-3.5-turbo");
        assert_eq!(config.session.cookie_name, "chatgpt-api");
        assert_eq!(config.features.history_limit, 10);
        assert!(config.roles.contains_key("translator"));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.runtime_max_blocking_threads, Some(8));
        assert!(config.server.stream_idle_timeout_secs.is_none());
        assert_eq!(config.upstream.base_url, "https://api.openai.com/v1");
        assert!((config.upstream.temperature - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.upstream.max_tokens, 128);
        assert!((config.upstream.top_p - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.session.user_id_cookie, "chatgpt-user-id");
        assert_eq!(config.session.encryption_key_env, "SESSION_ENCRYPTION_KEY");
        assert!(config.session.secure_cookie);
        assert_eq!(config.features.log_level, "INFO");
    }

    #[test]
    fn test_inline_encryption_key_wins() {
        let session = SessionConfig {
            encryption_key: Some(" inline ".to_string()),
            encryption_key_env: "CHAT_RELAY_TEST_UNSET_KEY_ENV".to_string(),
            ..SessionConfig::default()
        };
        assert_eq!(session.resolve_encryption_key().as_deref(), Some("inline"));
    }

    #[test]
    fn test_missing_encryption_key_resolves_none() {
        let session = SessionConfig {
            encryption_key: None,
            encryption_key_env: "CHAT_RELAY_TEST_UNSET_KEY_ENV".to_string(),
            ..SessionConfig::default()
        };
        assert!(session.resolve_encryption_key().is_none());
    }
}
