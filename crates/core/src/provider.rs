//! Provider trait — the abstraction over chat-completion backends.
//!
//! A Provider knows how to send a transcript to a language model and get a
//! response back, either as a complete message or as a stream of deltas.
//!
//! Implementations: OpenAI-compatible HTTP, SSE messages protocol, local
//! process-backed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// A normalized completion request, independent of backend wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g., "claude-sonnet-4-5", "gpt-4o")
    pub model: String,

    /// The conversation transcript (system messages allowed; backends that
    /// take the system prompt out-of-band extract it themselves)
    pub messages: Vec<Message>,

    /// System prompt, kept separate from the transcript so backends can
    /// place it where their protocol wants it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system_prompt: None,
            temperature: default_temperature(),
            max_tokens: None,
            stream: false,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated text
    pub content: String,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Token usage statistics (zero for backends that don't report)
    pub usage: Usage,

    /// Why generation stopped ("end_turn", "max_tokens", "stop", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only on the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Stop reason (only on the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// The core Provider trait.
///
/// Every backend implements this trait. The agent loop calls `complete()`
/// or `stream()` without knowing which backend is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A stable identifier for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ChatRequest,
    ) -> std::result::Result<ChatResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single final chunk, so backends without streaming still satisfy the
    /// streaming contract.
    async fn stream(
        &self,
        request: ChatRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.content),
                done: true,
                usage: Some(response.usage),
                stop_reason: response.stop_reason,
            }))
            .await;
        Ok(rx)
    }
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn chat_request_builder_defaults() {
        let req = ChatRequest::new("gpt-4o", vec![Message::user("hi")]);
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(!req.stream);
        assert!(req.system_prompt.is_none());

        let req = req.with_system_prompt("You are terse.").with_max_tokens(512);
        assert_eq!(req.system_prompt.as_deref(), Some("You are terse."));
        assert_eq!(req.max_tokens, Some(512));
    }

    #[test]
    fn usage_totals() {
        let usage = Usage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        struct Canned;

        #[async_trait]
        impl Provider for Canned {
            fn name(&self) -> &str {
                "canned"
            }
            async fn complete(
                &self,
                _request: ChatRequest,
            ) -> std::result::Result<ChatResponse, ProviderError> {
                Ok(ChatResponse {
                    content: "hello".into(),
                    model: "canned-1".into(),
                    usage: Usage::new(1, 1),
                    stop_reason: Some("end_turn".into()),
                })
            }
        }

        let mut rx = Canned
            .stream(ChatRequest::new("canned-1", vec![Message::user("hi")]))
            .await
            .unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("hello"));
        assert!(chunk.done);
        assert!(rx.recv().await.is_none());
    }
}
