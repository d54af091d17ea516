//! Router (spec §4.4): selects `(provider, model, parameters)` from a
//! canonical request and the current configuration snapshot.
//!
//! Selection is a deterministic, ordered cascade (first match wins) rather
//! than the teacher's hashed multi-candidate alias resolution — this
//! gateway has exactly one target per named route, so there is no
//! ambiguity to break with `request_hash`.

use serde_json::{Map, Value};

use crate::config::{AppConfig, RouteConfig};
use crate::error::GatewayError;
use crate::protocol::canonical::PARAMETER_WHITELIST;
use crate::protocol::CanonicalRequest;

/// The resolved target for a request (spec §4.4 output).
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub provider: String,
    pub model: String,
    pub parameters: Map<String, Value>,
}

const BACKGROUND_MODEL_PREFIX: &str = "claude-3-5-haiku";
const LONG_CONTEXT_THRESHOLD: u64 = 60_000;

/// Parses `request.model` as an explicit `<provider>,<model>` override
/// (spec §4.4 step 1). Returns `None` if the field doesn't contain a comma.
fn parse_explicit_override(model: &str) -> Option<(&str, &str)> {
    let (provider, model) = model.split_once(',')?;
    let provider = provider.trim();
    let model = model.trim();
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider, model))
}

/// Resolve `(provider, model, parameters)` for a canonical request.
///
/// `token_count` is the pre-computed input token count (spec §4.1), used
/// only to decide the long-context branch, so callers that already know
/// they won't hit it can pass `0` cheaply.
///
/// # Errors
///
/// Returns [`GatewayError::NoRoute`] if no selection rule matches, or
/// [`GatewayError::ProviderDisabled`] if the resolved provider exists but
/// is disabled.
pub fn resolve(
    config: &AppConfig,
    request: &CanonicalRequest,
    token_count: u64,
) -> Result<RouteTarget, GatewayError> {
    if let Some((provider, model)) = parse_explicit_override(&request.model) {
        ensure_provider_enabled(config, provider)?;
        return Ok(RouteTarget {
            provider: provider.to_string(),
            model: model.to_string(),
            parameters: Map::new(),
        });
    }

    if let Some(route) = config.routes.get(&request.model) {
        return target_from_route(config, route);
    }

    if token_count > LONG_CONTEXT_THRESHOLD {
        if let Some(route) = config.routes.get("longContext") {
            return target_from_route(config, route);
        }
    }

    if request
        .model
        .to_lowercase()
        .starts_with(BACKGROUND_MODEL_PREFIX)
    {
        if let Some(route) = config.routes.get("background") {
            return target_from_route(config, route);
        }
    }

    if request.thinking {
        if let Some(route) = config.routes.get("think") {
            return target_from_route(config, route);
        }
    }

    let default_route = config
        .routes
        .get("default")
        .ok_or_else(|| GatewayError::NoRoute(request.model.clone()))?;
    target_from_route(config, default_route)
}

fn target_from_route(config: &AppConfig, route: &RouteConfig) -> Result<RouteTarget, GatewayError> {
    ensure_provider_enabled(config, &route.provider)?;
    let parameters = route
        .parameters
        .iter()
        .filter(|(key, _)| PARAMETER_WHITELIST.contains(&key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(RouteTarget {
        provider: route.provider.clone(),
        model: route.model.clone(),
        parameters,
    })
}

fn ensure_provider_enabled(config: &AppConfig, provider: &str) -> Result<(), GatewayError> {
    let descriptor = config
        .providers
        .iter()
        .find(|p| p.name == provider)
        .ok_or_else(|| GatewayError::NoRoute(provider.to_string()))?;
    if !descriptor.enabled {
        return Err(GatewayError::ProviderDisabled(provider.to_string()));
    }
    Ok(())
}

/// Shallow-merge whitelisted route parameters onto a canonical request
/// (spec §4.4 final sentence). Route parameters override the corresponding
/// request field, matching the "injects or overrides" framing in spec §4.2.
pub fn apply_route_parameters(request: &mut CanonicalRequest, parameters: &Map<String, Value>) {
    for (key, value) in parameters {
        match key.as_str() {
            "temperature" => {
                request.temperature = value.as_f64();
            }
            "top_p" => {
                request.top_p = value.as_f64();
            }
            "top_k" => {
                request.top_k = value.as_u64();
            }
            "max_tokens" => {
                if let Some(n) = value.as_u64() {
                    request.max_tokens = n;
                }
            }
            "stop_sequences" => {
                if let Some(arr) = value.as_array() {
                    request.stop_sequences = arr
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                }
            }
            _ => {
                request.extra.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IpGatingConfig, PerformanceConfig, ServerConfig};
    use crate::protocol::canonical::{Message, MessageContent, Role};
    use smallvec::smallvec;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn request(model: &str) -> CanonicalRequest {
        CanonicalRequest {
            request_id: uuid::Uuid::nil(),
            model: model.to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Blocks(smallvec![
                    crate::protocol::canonical::ContentBlock::Text { text: "hi".into() }
                ]),
            }],
            system: None,
            tools: Arc::from(vec![]),
            max_tokens: 10,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: vec![],
            stream: false,
            thinking: false,
            extra: Default::default(),
        }
    }

    fn config_with_routes(routes: &[(&str, &str, &str)]) -> AppConfig {
        let mut route_map = HashMap::new();
        let mut providers = vec![];
        for (key, provider, model) in routes {
            if !providers.iter().any(|p: &crate::registry::ProviderDescriptor| &p.name == provider) {
                providers.push(crate::registry::ProviderDescriptor {
                    name: (*provider).to_string(),
                    dialect: crate::registry::Dialect::OpenAiChat,
                    api_base_url: "https://example.com".to_string(),
                    api_key: None,
                    enabled: true,
                    transformers: vec![],
                });
            }
            route_map.insert(
                (*key).to_string(),
                RouteConfig {
                    provider: (*provider).to_string(),
                    model: (*model).to_string(),
                    parameters: Map::new(),
                },
            );
        }
        AppConfig {
            server: ServerConfig::default(),
            performance: PerformanceConfig::default(),
            ip_gating: IpGatingConfig::default(),
            providers,
            routes: route_map,
        }
    }

    #[test]
    fn explicit_override_wins() {
        let config = config_with_routes(&[("default", "openai", "gpt-4o-mini")]);
        let req = request("openai,gpt-4o");
        let target = resolve(&config, &req, 0).unwrap();
        assert_eq!(target.provider, "openai");
        assert_eq!(target.model, "gpt-4o");
    }

    #[test]
    fn direct_route_before_default() {
        let config = config_with_routes(&[
            ("default", "openai", "gpt-4o-mini"),
            ("claude-3-sonnet", "anthropic", "claude-3-sonnet"),
        ]);
        let req = request("claude-3-sonnet");
        let target = resolve(&config, &req, 0).unwrap();
        assert_eq!(target.provider, "anthropic");
    }

    #[test]
    fn long_context_beats_default_above_threshold() {
        let config = config_with_routes(&[
            ("default", "openai", "gpt-4o-mini"),
            ("longContext", "openai", "gpt-4o"),
        ]);
        let req = request("claude-3-sonnet");
        let target = resolve(&config, &req, 60_001).unwrap();
        assert_eq!(target.model, "gpt-4o");
    }

    #[test]
    fn long_context_requires_strict_greater_than() {
        let config = config_with_routes(&[
            ("default", "openai", "gpt-4o-mini"),
            ("longContext", "openai", "gpt-4o"),
        ]);
        let req = request("claude-3-sonnet");
        let target = resolve(&config, &req, 60_000).unwrap();
        assert_eq!(target.model, "gpt-4o-mini");
    }

    #[test]
    fn background_prefix_is_case_insensitive() {
        let config = config_with_routes(&[
            ("default", "openai", "gpt-4o-mini"),
            ("background", "openai", "gpt-4o-mini-bg"),
        ]);
        let req = request("Claude-3-5-Haiku-20241022");
        let target = resolve(&config, &req, 0).unwrap();
        assert_eq!(target.model, "gpt-4o-mini-bg");
    }

    #[test]
    fn thinking_flag_routes_to_think() {
        let config = config_with_routes(&[
            ("default", "openai", "gpt-4o-mini"),
            ("think", "openai", "o1"),
        ]);
        let mut req = request("claude-3-sonnet");
        req.thinking = true;
        let target = resolve(&config, &req, 0).unwrap();
        assert_eq!(target.model, "o1");
    }

    #[test]
    fn disabled_provider_fails() {
        let mut config = config_with_routes(&[("default", "openai", "gpt-4o-mini")]);
        config.providers[0].enabled = false;
        let req = request("claude-3-sonnet");
        assert!(matches!(
            resolve(&config, &req, 0),
            Err(GatewayError::ProviderDisabled(_))
        ));
    }

    #[test]
    fn no_route_fails() {
        let config = config_with_routes(&[]);
        let req = request("claude-3-sonnet");
        assert!(matches!(resolve(&config, &req, 0), Err(GatewayError::NoRoute(_))));
    }
}
