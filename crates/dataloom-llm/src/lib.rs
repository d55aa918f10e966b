//! Blocking and streaming chat + embedding requests against a
//! Qwen/OpenAI-compatible endpoint, with parameter clamping and normalized
//! errors.

mod error;
mod message;
mod params;
mod sse;

pub use error::LLMError;
pub use message::{ChatMessage, Role};
pub use params::ChatParams;
pub use sse::{parse_sse_buffer, ParsedChunk};

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A finite, non-restartable sequence of text chunks. Dropping it cancels
/// the underlying HTTP request.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;

/// Default per-request timeout (spec §5: "each C1 call carries a timeout,
/// default 120s").
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, query: &str, params: ChatParams) -> Result<String, LLMError>;
    async fn stream(&self, query: &str, params: ChatParams) -> Result<ChatStream, LLMError>;
    async fn embed(&self, text: &str, params: ChatParams) -> Result<Vec<f32>, LLMError>;
}

/// Chat client for Qwen's OpenAI-compatible `/chat/completions` and
/// `/embeddings` endpoints.
pub struct QwenClient {
    http: reqwest::Client,
}

impl Default for QwenClient {
    fn default() -> Self {
        Self::new()
    }
}

impl QwenClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("reqwest client builds with static config"),
        }
    }

    fn build_messages(query: &str, history: &[ChatMessage]) -> Vec<WireMessage> {
        let mut messages: Vec<WireMessage> = history
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect();
        messages.push(WireMessage { role: "user".to_string(), content: query.to_string() });
        messages
    }

    fn build_payload(query: &str, params: &ChatParams, stream: bool) -> serde_json::Value {
        json!({
            "model": params.model,
            "messages": Self::build_messages(query, &params.history),
            "stream": stream,
            "top_p": params.top_p,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "frequency_penalty": params.frequency_penalty,
            "seed": 1368,
            "enable_thinking": params.enable_thinking,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl ChatProvider for QwenClient {
    async fn complete(&self, query: &str, params: ChatParams) -> Result<String, LLMError> {
        if params.api_key.is_empty() {
            return Err(LLMError::MissingApiKey);
        }
        let params = params.clamp();
        let url = format!("{}/chat/completions", params.base_url.trim_end_matches('/'));
        let payload = Self::build_payload(query, &params, false);

        tracing::info!(model = %params.model, "calling llm (blocking)");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&params.api_key)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(LLMError::Status { status, body });
        }

        let body: ChatCompletionResponse = resp.json().await?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::Malformed("response missing choices".to_string()))?;
        tracing::info!(chars = choice.message.content.len(), "llm response received");
        Ok(choice.message.content)
    }

    async fn stream(&self, query: &str, params: ChatParams) -> Result<ChatStream, LLMError> {
        if params.api_key.is_empty() {
            return Err(LLMError::MissingApiKey);
        }
        let params = params.clamp();
        let url = format!("{}/chat/completions", params.base_url.trim_end_matches('/'));
        let payload = Self::build_payload(query, &params, true);

        tracing::info!(model = %params.model, "calling llm (streaming)");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&params.api_key)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(LLMError::Status { status, body });
        }

        let byte_stream = resp.bytes_stream();
        let text_stream = byte_stream.scan(String::new(), |carry, chunk| {
            let chunk = match chunk {
                Ok(b) => b,
                Err(e) => return std::future::ready(Some(Err(LLMError::from(e)))),
            };
            carry.push_str(&String::from_utf8_lossy(&chunk));
            // Keep any trailing partial line in `carry` for the next poll.
            let last_newline = carry.rfind('\n');
            let (complete, rest) = match last_newline {
                Some(idx) => (carry[..=idx].to_string(), carry[idx + 1..].to_string()),
                None => (String::new(), carry.clone()),
            };
            *carry = rest;
            let parsed = parse_sse_buffer(&complete);
            std::future::ready(Some(Ok(parsed)))
        });

        let flat = text_stream.flat_map(|parsed| match parsed {
            Ok(p) => {
                let items: Vec<Result<String, LLMError>> = p.deltas.into_iter().map(Ok).collect();
                futures_util::stream::iter(items)
            }
            Err(e) => futures_util::stream::iter(vec![Err(e)]),
        });

        Ok(Box::pin(flat))
    }

    async fn embed(&self, text: &str, params: ChatParams) -> Result<Vec<f32>, LLMError> {
        if params.api_key.is_empty() {
            return Err(LLMError::MissingApiKey);
        }
        let url = format!("{}/embeddings", params.base_url.trim_end_matches('/'));
        let payload = json!({ "model": "text-embedding-v4", "input": text });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&params.api_key)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(LLMError::Status { status, body });
        }

        let body: EmbeddingResponse = resp.json().await?;
        let datum = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::Malformed("embedding response missing data".to_string()))?;
        Ok(datum.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_messages_maps_history_roles() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::system("ctx")];
        let messages = QwenClient::build_messages("now", &history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "system");
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content, "now");
    }

    #[test]
    fn build_payload_carries_clamped_params_and_fixed_seed() {
        let params = ChatParams::default().clamp();
        let payload = QwenClient::build_payload("q", &params, false);
        assert_eq!(payload["seed"], 1368);
        assert_eq!(payload["stream"], false);
        assert_eq!(payload["model"], "qwen-max");
    }
}
