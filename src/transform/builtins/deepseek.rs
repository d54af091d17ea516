use serde_json::Value;

use super::Transformer;
use crate::error::GatewayError;
use crate::protocol::CanonicalRequest;

const DEEPSEEK_MAX_TOKENS: u64 = 8192;

/// OpenAI-dialect subset (spec §4.3 `deepseek`): clamps `max_tokens` to
/// 8192 and strips tool declarations, since this provider does not emit
/// tool calls. Its `reasoning_content` streaming field is surfaced by
/// [`crate::protocol::openai_chat::StreamState`]'s `surface_reasoning`
/// flag, which the relay enables when the resolved dialect is DeepSeek —
/// that is a decoding concern, not a payload rewrite, so it has no
/// counterpart here.
pub struct DeepSeekTransformer;

impl DeepSeekTransformer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for DeepSeekTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for DeepSeekTransformer {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    fn transform_request_in(&self, mut request: CanonicalRequest) -> Result<CanonicalRequest, GatewayError> {
        request.max_tokens = request.max_tokens.min(DEEPSEEK_MAX_TOKENS);
        Ok(request)
    }

    fn transform_request_out(&self, mut payload: Value) -> Result<Value, GatewayError> {
        if let Some(obj) = payload.as_object_mut() {
            obj.remove("tools");
            obj.remove("tool_choice");
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{ContentBlock, Message, MessageContent, Role};
    use smallvec::smallvec;
    use std::sync::Arc;

    #[test]
    fn clamps_max_tokens_to_8192() {
        let t = DeepSeekTransformer::new();
        let request = CanonicalRequest {
            request_id: uuid::Uuid::nil(),
            model: "deepseek-chat".into(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Blocks(smallvec![ContentBlock::Text { text: "hi".into() }]),
            }],
            system: None,
            tools: Arc::from(vec![]),
            max_tokens: 8193,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: vec![],
            stream: false,
            thinking: false,
            extra: Default::default(),
        };
        let out = t.transform_request_in(request).unwrap();
        assert_eq!(out.max_tokens, 8192);
    }

    #[test]
    fn strips_tool_declarations_from_outgoing_payload() {
        let t = DeepSeekTransformer::new();
        let payload = serde_json::json!({"model": "deepseek-chat", "tools": [{"type":"function"}]});
        let out = t.transform_request_out(payload).unwrap();
        assert!(out.get("tools").is_none());
    }
}
