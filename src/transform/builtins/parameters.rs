use serde_json::{Map, Value};

use super::Transformer;
use crate::error::GatewayError;
use crate::protocol::CanonicalRequest;

/// Injects or overrides whitelisted parameters on the request (spec §4.3
/// `parameters(set)`). Unlike a route's parameter merge (which only fills
/// gaps the client left unset), this transformer *overrides* unconditionally
/// — it is meant for a provider that must always run with a fixed setting.
pub struct ParametersTransformer {
    overrides: Map<String, Value>,
}

impl ParametersTransformer {
    #[must_use]
    pub fn new(overrides: Map<String, Value>) -> Self {
        Self { overrides }
    }
}

impl Transformer for ParametersTransformer {
    fn name(&self) -> &'static str {
        "parameters"
    }

    fn transform_request_in(&self, mut request: CanonicalRequest) -> Result<CanonicalRequest, GatewayError> {
        for (key, value) in &self.overrides {
            match key.as_str() {
                "temperature" => request.temperature = value.as_f64(),
                "top_p" => request.top_p = value.as_f64(),
                "top_k" => request.top_k = value.as_u64(),
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
                "frequency_penalty" | "presence_penalty" => {
                    request.extra.insert(key.clone(), value.clone());
                }
                _ => {}
            }
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{ContentBlock, Message, MessageContent, Role};
    use smallvec::smallvec;
    use std::sync::Arc;

    #[test]
    fn overrides_temperature_unconditionally() {
        let mut overrides = Map::new();
        overrides.insert("temperature".to_string(), serde_json::json!(0.1));
        let t = ParametersTransformer::new(overrides);
        let request = CanonicalRequest {
            request_id: uuid::Uuid::nil(),
            model: "m".into(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Blocks(smallvec![ContentBlock::Text { text: "hi".into() }]),
            }],
            system: None,
            tools: Arc::from(vec![]),
            max_tokens: 10,
            temperature: Some(0.9),
            top_p: None,
            top_k: None,
            stop_sequences: vec![],
            stream: false,
            thinking: false,
            extra: Default::default(),
        };
        let out = t.transform_request_in(request).unwrap();
        assert_eq!(out.temperature, Some(0.1));
    }
}
