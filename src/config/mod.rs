//! Application configuration (spec §6 "Persisted state", SPEC_FULL §0.1).
//!
//! Load order is command-line flags > environment variables > config file >
//! built-in defaults, matching the teacher's layered `ServerConfig` idiom
//! (wire struct with `#[serde(default = "...")]` plus a hand-written
//! `Deserialize` impl) extended with an env/CLI override pass.

pub mod validation;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::registry::{Dialect, ProviderDescriptor};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Server listen + cross-cutting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log: String,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub apikey: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Origins reflected in `Access-Control-Allow-Origin` (spec §4.8
    /// "CORS: Allow-Origin mirrors configured origins"). Empty means
    /// mirror whatever `Origin` the caller sent.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log: default_log_level(),
            log_file: None,
            apikey: None,
            proxy_url: None,
            cors_allowed_origins: Vec::new(),
        }
    }
}

/// Performance-guard thresholds (spec §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_body_size")]
    pub max_request_body_size: usize,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_requests_per_min: u32,
    #[serde(default = "default_true")]
    pub circuit_breaker_enabled: bool,
    /// Cap on concurrently in-flight requests (spec §4.9 "Resource limits";
    /// stands in for process RSS / CPU thresholds, which need a
    /// system-metrics dependency outside this stack).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_requests: usize,
}

fn default_request_timeout() -> u64 {
    30
}
fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_rate_limit_rpm() -> u32 {
    600
}
fn default_max_in_flight() -> usize {
    512
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            max_request_body_size: default_max_body_size(),
            metrics_enabled: true,
            rate_limit_enabled: true,
            rate_limit_requests_per_min: default_rate_limit_rpm(),
            circuit_breaker_enabled: true,
            max_in_flight_requests: default_max_in_flight(),
        }
    }
}

/// IP gating lists consulted by the auth middleware (spec §4.8 rule 3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IpGatingConfig {
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

/// A named route (spec §3 `Route`, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub provider: String,
    pub model: String,
    /// Whitelisted parameter overrides, shallow-merged onto the request.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub ip_gating: IpGatingConfig,
    pub providers: Vec<ProviderDescriptor>,
    /// Keyed by either a special name (`default`, `longContext`, `background`,
    /// `think`) or a literal canonical model name.
    pub routes: HashMap<String, RouteConfig>,
}

/// Load configuration from a YAML file, layer environment variables on top
/// (spec §6 "Environment surface"), and validate the result.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails,
/// [`ConfigError::Yaml`] when parsing fails, or [`ConfigError::Validation`]
/// when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let mut config: AppConfig = serde_yaml::from_str(&contents)?;
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Applies `CCPROXY_*` overrides and documented provider API-key variables
/// on top of a file-loaded config (spec §6). CLI flags, applied by the
/// binary entry point, take precedence over these in turn.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(host) = std::env::var("CCPROXY_HOST") {
        config.server.host = host;
    }
    if let Ok(port) = std::env::var("CCPROXY_PORT") {
        if let Ok(port) = port.parse() {
            config.server.port = port;
        }
    }
    if let Ok(key) = std::env::var("CCPROXY_API_KEY") {
        config.server.apikey = Some(key);
    }

    for provider in &mut config.providers {
        if provider.api_key.is_some() {
            continue;
        }
        let env_var = match provider.dialect {
            Dialect::OpenAiChat => "OPENAI_API_KEY",
            Dialect::Anthropic => "ANTHROPIC_API_KEY",
            Dialect::Gemini => "GEMINI_API_KEY",
            Dialect::DeepSeek => "DEEPSEEK_API_KEY",
            Dialect::OpenRouter => "OPENROUTER_API_KEY",
        };
        if let Ok(key) = std::env::var(env_var) {
            provider.api_key = Some(key);
        } else if provider.dialect == Dialect::Gemini {
            if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
                provider.api_key = Some(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 8787);
        let perf = PerformanceConfig::default();
        assert_eq!(perf.max_request_body_size, 10 * 1024 * 1024);
    }

    #[test]
    fn env_override_applies_to_host() {
        std::env::set_var("CCPROXY_HOST", "127.0.0.1");
        let mut config = AppConfig {
            server: ServerConfig::default(),
            performance: PerformanceConfig::default(),
            ip_gating: IpGatingConfig::default(),
            providers: vec![],
            routes: HashMap::new(),
        };
        apply_env_overrides(&mut config);
        assert_eq!(config.server.host, "127.0.0.1");
        std::env::remove_var("CCPROXY_HOST");
    }
}
