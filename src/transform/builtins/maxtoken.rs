use super::Transformer;
use crate::error::GatewayError;
use crate::protocol::CanonicalRequest;

/// Caps `max_tokens` at a fixed `limit` (spec §4.3 `maxtoken(limit)`).
pub struct MaxTokenTransformer {
    limit: u64,
}

impl MaxTokenTransformer {
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl Transformer for MaxTokenTransformer {
    fn name(&self) -> &'static str {
        "maxtoken"
    }

    fn transform_request_in(&self, mut request: CanonicalRequest) -> Result<CanonicalRequest, GatewayError> {
        request.max_tokens = request.max_tokens.min(self.limit);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{ContentBlock, Message, MessageContent, Role};
    use smallvec::smallvec;
    use std::sync::Arc;

    fn request(max_tokens: u64) -> CanonicalRequest {
        CanonicalRequest {
            request_id: uuid::Uuid::nil(),
            model: "m".into(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Blocks(smallvec![ContentBlock::Text { text: "hi".into() }]),
            }],
            system: None,
            tools: Arc::from(vec![]),
            max_tokens,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: vec![],
            stream: false,
            thinking: false,
            extra: Default::default(),
        }
    }

    #[test]
    fn clamps_above_limit() {
        let t = MaxTokenTransformer::new(8192);
        let req = t.transform_request_in(request(10_000)).unwrap();
        assert_eq!(req.max_tokens, 8192);
    }

    #[test]
    fn leaves_below_limit_untouched() {
        let t = MaxTokenTransformer::new(8192);
        let req = t.transform_request_in(request(100)).unwrap();
        assert_eq!(req.max_tokens, 100);
    }
}
