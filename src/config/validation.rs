use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is
/// violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is
/// violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_performance_config(config)?;
    validate_providers(config)?;
    validate_routes(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_performance_config(config: &AppConfig) -> Result<(), ConfigError> {
    let perf = &config.performance;
    if perf.max_request_body_size == 0 {
        return Err(validation_err(
            "performance.max_request_body_size must be greater than 0",
        ));
    }
    if perf.request_timeout_secs == 0 {
        return Err(validation_err(
            "performance.request_timeout_secs must be greater than 0",
        ));
    }
    if perf.rate_limit_enabled && perf.rate_limit_requests_per_min == 0 {
        return Err(validation_err(
            "performance.rate_limit_requests_per_min must be greater than 0 when rate limiting is enabled",
        ));
    }
    Ok(())
}

fn validate_providers(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for provider in &config.providers {
        if provider.name.trim().is_empty() {
            return Err(validation_err("provider name cannot be empty"));
        }
        if !seen.insert(provider.name.as_str()) {
            return Err(validation_err(format!(
                "duplicate provider name '{}'",
                provider.name
            )));
        }
        if provider.api_base_url.trim().is_empty() {
            return Err(validation_err(format!(
                "provider '{}' is missing api_base_url",
                provider.name
            )));
        }
    }
    Ok(())
}

fn validate_routes(config: &AppConfig) -> Result<(), ConfigError> {
    if !config.routes.contains_key("default") {
        return Err(validation_err("routes must define a 'default' entry"));
    }
    let provider_names: HashSet<&str> =
        config.providers.iter().map(|p| p.name.as_str()).collect();
    for (key, route) in &config.routes {
        if !provider_names.contains(route.provider.as_str()) {
            return Err(validation_err(format!(
                "route '{key}' references unknown provider '{}'",
                route.provider
            )));
        }
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.server.log.to_lowercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "server.log must be one of {VALID_LOG_LEVELS:?}, got '{}'",
            config.server.log
        )));
    }
    Ok(())
}
