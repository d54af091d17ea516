//! The seven built-in named transformers (spec §4.3).
//!
//! `anthropic`, `openai`, and `gemini` are thin markers: the substantive
//! canonical↔wire conversion they describe already lives in the matching
//! [`crate::protocol`] dialect module and is invoked by the Pipeline
//! directly, keyed off the provider's configured dialect, so these three
//! only carry the narrow extra adjustments the spec calls out by name.
//! `deepseek`, `openrouter`, `maxtoken`, and `parameters` carry real,
//! provider-independent request/payload adjustments and so are fully
//! implemented here.

mod deepseek;
mod maxtoken;
mod parameters;

pub use deepseek::DeepSeekTransformer;
pub use maxtoken::MaxTokenTransformer;
pub use parameters::ParametersTransformer;

use std::sync::Arc;

use serde_json::Value;

use super::Transformer;
use crate::error::GatewayError;

/// Identity for canonical requests; strips OpenAI-only fields
/// (`frequency_penalty`, `presence_penalty`) from the outgoing payload
/// so a non-Anthropic-shaped request never leaks them into an
/// Anthropic-dialect call (spec §4.3 `anthropic`).
pub struct AnthropicTransformer;

impl Transformer for AnthropicTransformer {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn transform_request_out(&self, mut payload: Value) -> Result<Value, GatewayError> {
        if let Some(obj) = payload.as_object_mut() {
            obj.remove("frequency_penalty");
            obj.remove("presence_penalty");
        }
        Ok(payload)
    }
}

/// Marker transformer for the OpenAI chat-completions dialect (spec §4.3
/// `openai`): merging adjacent text blocks, tool-call translation, and
/// `stop_reason`/`finish_reason` mapping are performed by
/// [`crate::protocol::openai_chat`] itself.
pub struct OpenAiTransformer;

impl Transformer for OpenAiTransformer {
    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Marker transformer for the Google Generative-Language dialect (spec
/// §4.3 `gemini`): wrapping generation parameters in `generationConfig`,
/// mapping `max_tokens`→`maxOutputTokens`, and function-call translation
/// are performed by [`crate::protocol::gemini`] itself.
pub struct GeminiTransformer;

impl Transformer for GeminiTransformer {
    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Marker transformer for OpenRouter (spec §4.3 `openrouter`): the
/// `HTTP-Referer`/`X-Title` routing headers it prepends are HTTP headers,
/// not body fields, and are injected by [`crate::transport`] based on the
/// provider's dialect; the body is an unmodified OpenAI-dialect pass-through.
pub struct OpenRouterTransformer;

impl Transformer for OpenRouterTransformer {
    fn name(&self) -> &'static str {
        "openrouter"
    }
}

/// Parse a configured transformer name (spec: `ProviderDescriptor.transformers`,
/// e.g. `"maxtoken:8192"`, `"parameters:{\"temperature\":0.2}"`) into a
/// transformer instance.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] if the name is unrecognized or a
/// parameterized transformer's argument fails to parse.
pub fn build_transformer(spec: &str) -> Result<Arc<dyn Transformer>, GatewayError> {
    let (name, arg) = spec.split_once(':').unwrap_or((spec, ""));
    match name {
        "anthropic" => Ok(Arc::new(AnthropicTransformer)),
        "openai" => Ok(Arc::new(OpenAiTransformer)),
        "gemini" => Ok(Arc::new(GeminiTransformer)),
        "openrouter" => Ok(Arc::new(OpenRouterTransformer)),
        "deepseek" => Ok(Arc::new(DeepSeekTransformer::new())),
        "maxtoken" => {
            let limit: u64 = arg
                .parse()
                .map_err(|_| GatewayError::Config(format!("invalid maxtoken limit: '{arg}'")))?;
            Ok(Arc::new(MaxTokenTransformer::new(limit)))
        }
        "parameters" => {
            let overrides: serde_json::Map<String, Value> = serde_json::from_str(arg)
                .map_err(|e| GatewayError::Config(format!("invalid parameters payload: {e}")))?;
            Ok(Arc::new(ParametersTransformer::new(overrides)))
        }
        other => Err(GatewayError::Config(format!(
            "unknown transformer '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_strips_openai_only_fields() {
        let t = AnthropicTransformer;
        let payload = serde_json::json!({"model": "claude-3-sonnet", "frequency_penalty": 0.5, "presence_penalty": 0.1});
        let out = t.transform_request_out(payload).unwrap();
        assert!(out.get("frequency_penalty").is_none());
        assert!(out.get("presence_penalty").is_none());
        assert_eq!(out["model"], "claude-3-sonnet");
    }

    #[test]
    fn build_transformer_rejects_unknown_name() {
        assert!(build_transformer("made-up").is_err());
    }

    #[test]
    fn build_transformer_parses_maxtoken() {
        assert!(build_transformer("maxtoken:8192").is_ok());
        assert!(build_transformer("maxtoken:not-a-number").is_err());
    }
}
