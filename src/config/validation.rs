use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_session(config)?;
    validate_roles(config)?;
    validate_features(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if server.runtime_worker_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_worker_threads must be greater than 0 when set",
        ));
    }
    if server.runtime_max_blocking_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_max_blocking_threads must be greater than 0 when set",
        ));
    }
    if server.tcp_reuse_port_listener_count == Some(0) {
        return Err(validation_err(
            "server.tcp_reuse_port_listener_count must be greater than 0 when set",
        ));
    }
    if server.stream_idle_timeout_secs == Some(0) {
        return Err(validation_err(
            "server.stream_idle_timeout_secs must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://") {
        return Err(validation_err(
            "upstream.base_url must start with http:// or https://",
        ));
    }
    if let Err(err) = url::Url::parse(&upstream.base_url) {
        return Err(validation_err(format!(
            "upstream.base_url is not a valid URL: {err}"
        )));
    }
    if upstream.model.trim().is_empty() {
        return Err(validation_err("upstream.model cannot be empty"));
    }
    if !(0.0..=2.0).contains(&upstream.temperature) {
        return Err(validation_err(
            "upstream.temperature must be between 0 and 2",
        ));
    }
    if upstream.max_tokens == 0 {
        return Err(validation_err("upstream.max_tokens must be greater than 0"));
    }
    if !(0.0..=1.0).contains(&upstream.top_p) {
        return Err(validation_err("upstream.top_p must be between 0 and 1"));
    }
    for (name, value) in [
        ("frequency_penalty", upstream.frequency_penalty),
        ("presence_penalty", upstream.presence_penalty),
    ] {
        if !(-2.0..=2.0).contains(&value) {
            return Err(validation_err(format!(
                "upstream.{name} must be between -2 and 2"
            )));
        }
    }
    if let Some(proxy) = upstream.proxy.as_deref() {
        validate_proxy_url(proxy)?;
    }
    Ok(())
}

fn validate_proxy_url(proxy: &str) -> Result<(), ConfigError> {
    let proxy = proxy.trim();
    if proxy.is_empty() {
        return Ok(());
    }
    let parsed = url::Url::parse(proxy)
        .map_err(|err| validation_err(format!("upstream.proxy is not a valid URL: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(validation_err(format!(
            "upstream.proxy has unsupported scheme '{other}'"
        ))),
    }
}

fn is_cookie_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn validate_session(config: &AppConfig) -> Result<(), ConfigError> {
    let session = &config.session;
    for (field, name) in [
        ("cookie_name", session.cookie_name.as_str()),
        ("user_id_cookie", session.user_id_cookie.as_str()),
    ] {
        if name.is_empty() || !name.chars().all(is_cookie_name_char) {
            return Err(validation_err(format!(
                "session.{field} must be a non-empty token of [A-Za-z0-9._-]"
            )));
        }
    }
    if session.cookie_name == session.user_id_cookie {
        return Err(validation_err(
            "session.cookie_name and session.user_id_cookie must differ",
        ));
    }
    if session.encryption_key.is_none() && session.encryption_key_env.trim().is_empty() {
        return Err(validation_err(
            "session.encryption_key_env cannot be empty when no inline key is set",
        ));
    }
    Ok(())
}

fn validate_roles(config: &AppConfig) -> Result<(), ConfigError> {
    for (name, prompt) in &config.roles {
        if name.trim().is_empty() {
            return Err(validation_err("roles contains an empty role name"));
        }
        if prompt.trim().is_empty() {
            return Err(validation_err(format!("roles.{name} has an empty prompt")));
        }
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED", "TRACE",
];

fn validate_features(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' is invalid. Must be one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    if config.features.history_limit == 0 {
        return Err(validation_err(
            "features.history_limit must be greater than 0",
        ));
    }
    Ok(())
}
