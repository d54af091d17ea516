//! HTTP Executor (spec §4.5): a pooled outbound HTTPS client, per-dialect
//! URL/header assembly, and HTTP-status→error-category mapping. Error
//! sanitization lives in [`sanitize`].

pub mod sanitize;

use std::time::{Duration, Instant};

use reqwest::Response;
use serde_json::Value;

use crate::error::GatewayError;
use crate::registry::{Dialect, ProviderDescriptor};

pub use sanitize::sanitize_text;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Pooled outbound HTTPS client shared across all requests (spec §5
/// "Outbound connection pool: shared across requests; bounded per host;
/// idle-close after timeout").
pub struct HttpExecutor {
    client: reqwest::Client,
    body_size_cap: usize,
}

impl HttpExecutor {
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if the underlying reqwest client
    /// fails to build (e.g. an invalid TLS configuration).
    pub fn new(request_timeout: Duration, body_size_cap: usize) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(16)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            body_size_cap: body_size_cap.min(MAX_RESPONSE_BODY_BYTES),
        })
    }

    /// Assemble the dialect-specific URL for a non-streaming or streaming
    /// call (spec §6 "Outbound dialects").
    #[must_use]
    pub fn endpoint_url(provider: &ProviderDescriptor, model: &str, streaming: bool) -> String {
        let base = provider.api_base_url.trim_end_matches('/');
        match provider.dialect {
            Dialect::OpenAiChat | Dialect::DeepSeek | Dialect::OpenRouter => {
                format!("{base}/chat/completions")
            }
            Dialect::Anthropic => format!("{base}/v1/messages"),
            Dialect::Gemini => {
                let method = if streaming {
                    "streamGenerateContent"
                } else {
                    "generateContent"
                };
                let key = provider.api_key.as_deref().unwrap_or_default();
                format!("{base}/v1beta/models/{model}:{method}?key={key}")
            }
        }
    }

    /// Build the outbound request, including dialect-specific auth headers
    /// (spec §4.5, §6).
    #[must_use]
    pub fn prepare(
        &self,
        provider: &ProviderDescriptor,
        model: &str,
        body: &Value,
        streaming: bool,
    ) -> reqwest::RequestBuilder {
        let url = Self::endpoint_url(provider, model, streaming);
        let mut req = self.client.post(url).json(body);

        req = match provider.dialect {
            Dialect::Anthropic => req
                .header("anthropic-version", "2023-06-01")
                .header("x-api-key", provider.api_key.as_deref().unwrap_or_default()),
            Dialect::Gemini => req,
            Dialect::OpenRouter => req
                .bearer_auth(provider.api_key.as_deref().unwrap_or_default())
                .header("HTTP-Referer", "https://ccproxy.invalid")
                .header("X-Title", "ccproxy"),
            Dialect::OpenAiChat | Dialect::DeepSeek => {
                req.bearer_auth(provider.api_key.as_deref().unwrap_or_default())
            }
        };

        if streaming {
            req = req.header("Accept", "text/event-stream");
        } else {
            req = req.header("Content-Type", "application/json");
        }
        req
    }

    /// Send a non-streaming request and return the parsed JSON body.
    ///
    /// # Errors
    ///
    /// Maps transport failures and non-2xx HTTP statuses to the
    /// corresponding [`GatewayError`] category (spec §4.5).
    pub async fn execute_buffered(
        &self,
        provider: &ProviderDescriptor,
        model: &str,
        body: &Value,
    ) -> Result<(Value, Duration), GatewayError> {
        let started = Instant::now();
        let response = self
            .prepare(provider, model, body, false)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = check_status(response).await?;
        let bytes = read_capped_body(response, self.body_size_cap).await?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::BadProviderResponse(format!("invalid JSON body: {e}")))?;
        Ok((value, started.elapsed()))
    }

    /// Send a streaming request and return the open response for the
    /// relay to consume line-by-line.
    ///
    /// # Errors
    ///
    /// See [`HttpExecutor::execute_buffered`].
    pub async fn execute_streaming(
        &self,
        provider: &ProviderDescriptor,
        model: &str,
        body: &Value,
    ) -> Result<Response, GatewayError> {
        let response = self
            .prepare(provider, model, body, true)
            .send()
            .await
            .map_err(map_transport_error)?;
        check_status(response).await
    }
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(sanitize_text(&err.to_string()))
    } else {
        GatewayError::UpstreamFailure {
            status: 0,
            message: sanitize_text(&err.to_string()),
        }
    }
}

async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body_text = response.text().await.unwrap_or_default();
    let sanitized = sanitize_text(&body_text);
    Err(GatewayError::from_upstream_status(
        status.as_u16(),
        sanitized,
        retry_after,
    ))
}

async fn read_capped_body(response: Response, cap: usize) -> Result<Vec<u8>, GatewayError> {
    if let Some(len) = response.content_length() {
        if len as usize > cap {
            return Err(GatewayError::PayloadTooLarge(len as usize, cap));
        }
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| GatewayError::UpstreamFailure {
            status: 0,
            message: sanitize_text(&e.to_string()),
        })?;
    if bytes.len() > cap {
        return Err(GatewayError::PayloadTooLarge(bytes.len(), cap));
    }
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(dialect: Dialect) -> ProviderDescriptor {
        ProviderDescriptor {
            name: "p".into(),
            dialect,
            api_base_url: "https://api.example.com/v1".into(),
            api_key: Some("key123".into()),
            enabled: true,
            transformers: vec![],
        }
    }

    #[test]
    fn openai_endpoint_is_chat_completions() {
        let url = HttpExecutor::endpoint_url(&provider(Dialect::OpenAiChat), "gpt-4o", false);
        assert_eq!(url, "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn anthropic_endpoint_is_messages() {
        let url = HttpExecutor::endpoint_url(&provider(Dialect::Anthropic), "claude-3-sonnet", false);
        assert_eq!(url, "https://api.example.com/v1/v1/messages");
    }

    #[test]
    fn gemini_endpoint_switches_method_on_stream() {
        let non_stream = HttpExecutor::endpoint_url(&provider(Dialect::Gemini), "gemini-1.5-pro", false);
        let stream = HttpExecutor::endpoint_url(&provider(Dialect::Gemini), "gemini-1.5-pro", true);
        assert!(non_stream.ends_with(":generateContent?key=key123"));
        assert!(stream.ends_with(":streamGenerateContent?key=key123"));
    }
}
