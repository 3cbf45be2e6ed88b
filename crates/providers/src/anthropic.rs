//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` protocol header
//! - System prompt as top-level field
//! - Always streams on the wire (`stream: true`); `complete()` accumulates
//!   the SSE events into one response
//! - Manual `event:`/`data:` line parsing; malformed or out-of-order frames
//!   are skipped without aborting the stream

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};
use wardclaw_core::error::ProviderError;
use wardclaw_core::message::{Message, Role};
use wardclaw_core::provider::{ChatRequest, ChatResponse, Provider, StreamChunk, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Pull system messages out of the transcript. Anthropic takes the
    /// system prompt as a top-level field, not in `messages`.
    fn extract_system(request: &ChatRequest) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        if let Some(prompt) = &request.system_prompt {
            system_parts.push(prompt);
        }

        let mut non_system: Vec<&Message> = Vec::new();
        for msg in &request.messages {
            if msg.role == Role::System {
                system_parts.push(msg.content.as_str());
            } else {
                non_system.push(msg);
            }
        }

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system, non_system)
    }

    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    Role::Assistant => "assistant".into(),
                    _ => "user".into(),
                },
                content: m.content.clone(),
            })
            .collect()
    }

    fn build_body(request: &ChatRequest) -> serde_json::Value {
        let (system, messages) = Self::extract_system(request);
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "stream": true,
        });
        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthRequired("invalid Anthropic API key".into()));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::Api {
                status_code: status,
                message: error_body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = Self::build_body(&request);
        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self.send(&body).await?;

        // Drain the event stream inline, accumulating into one response.
        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut acc = SseAccumulator::default();

        while let Some(chunk_result) = byte_stream.next().await {
            let bytes =
                chunk_result.map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(line_end) = buffer.find('\n') {
                let raw: String = buffer.drain(..=line_end).collect();
                if let Some(event) = parse_sse_line(raw.trim_end_matches(['\r', '\n'])) {
                    acc.apply(event);
                }
            }
            if acc.stopped {
                break;
            }
        }

        acc.into_response(&request.model)
    }

    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let body = Self::build_body(&request);
        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self.send(&body).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut input_tokens: u32 = 0;
            let mut output_tokens: u32 = 0;
            let mut stop_reason: Option<String> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let interrupted = ProviderError::StreamInterrupted(e.to_string());
                        let _ = tx.send(Err(interrupted)).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let raw: String = buffer.drain(..=line_end).collect();
                    let Some(event) = parse_sse_line(raw.trim_end_matches(['\r', '\n'])) else {
                        continue;
                    };

                    match event {
                        SseEvent::MessageStart { input_tokens: inp, .. } => {
                            input_tokens = inp;
                        }
                        SseEvent::TextDelta(text) => {
                            let chunk = StreamChunk {
                                content: Some(text),
                                done: false,
                                usage: None,
                                stop_reason: None,
                            };
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        SseEvent::MessageDelta {
                            stop_reason: reason,
                            output_tokens: out,
                        } => {
                            if reason.is_some() {
                                stop_reason = reason;
                            }
                            if out > 0 {
                                output_tokens = out;
                            }
                        }
                        SseEvent::MessageStop => {
                            let _ = tx
                                .send(Ok(StreamChunk {
                                    content: None,
                                    done: true,
                                    usage: Some(Usage::new(input_tokens, output_tokens)),
                                    stop_reason: stop_reason.take(),
                                }))
                                .await;
                            return;
                        }
                        SseEvent::Ignored => {}
                    }
                }
            }

            // Stream ended without message_stop
            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    done: true,
                    usage: Some(Usage::new(input_tokens, output_tokens)),
                    stop_reason,
                }))
                .await;
        });

        Ok(rx)
    }
}

// --- SSE event parsing ---

/// One normalized event from the Messages SSE stream.
#[derive(Debug, Clone, PartialEq)]
enum SseEvent {
    MessageStart {
        model: Option<String>,
        input_tokens: u32,
    },
    TextDelta(String),
    MessageDelta {
        stop_reason: Option<String>,
        output_tokens: u32,
    },
    MessageStop,
    Ignored,
}

/// Parse one SSE line. `event:` lines carry no payload we need (the JSON
/// `type` field repeats it), so only `data:` lines yield events. Returns
/// `None` for blanks, comments, and frames that don't parse.
fn parse_sse_line(line: &str) -> Option<SseEvent> {
    if line.is_empty() || line.starts_with(':') || line.starts_with("event: ") {
        return None;
    }

    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }

    let event: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            trace!(error = %e, data = %data, "Ignoring unparseable SSE frame");
            return None;
        }
    };

    let event_type = event["type"].as_str().unwrap_or("");
    let parsed = match event_type {
        "message_start" => {
            let message = &event["message"];
            SseEvent::MessageStart {
                model: message["model"].as_str().map(String::from),
                input_tokens: message["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            }
        }
        "content_block_delta" => {
            let delta = &event["delta"];
            match delta["type"].as_str() {
                Some("text_delta") => match delta["text"].as_str() {
                    Some(text) => SseEvent::TextDelta(text.to_string()),
                    None => SseEvent::Ignored,
                },
                _ => SseEvent::Ignored,
            }
        }
        "message_delta" => SseEvent::MessageDelta {
            stop_reason: event["delta"]["stop_reason"].as_str().map(String::from),
            output_tokens: event["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        },
        "message_stop" => SseEvent::MessageStop,
        _ => SseEvent::Ignored,
    };

    Some(parsed)
}

/// Folds SSE events into one complete response.
#[derive(Debug, Default)]
struct SseAccumulator {
    content: String,
    model: Option<String>,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<String>,
    stopped: bool,
}

impl SseAccumulator {
    fn apply(&mut self, event: SseEvent) {
        match event {
            SseEvent::MessageStart {
                model,
                input_tokens,
            } => {
                if model.is_some() {
                    self.model = model;
                }
                self.input_tokens = input_tokens;
            }
            SseEvent::TextDelta(text) => self.content.push_str(&text),
            SseEvent::MessageDelta {
                stop_reason,
                output_tokens,
            } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                if output_tokens > 0 {
                    self.output_tokens = output_tokens;
                }
            }
            SseEvent::MessageStop => self.stopped = true,
            SseEvent::Ignored => {}
        }
    }

    fn into_response(self, requested_model: &str) -> Result<ChatResponse, ProviderError> {
        if self.content.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "stream carried no text deltas".into(),
            ));
        }
        Ok(ChatResponse {
            content: self.content,
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            usage: Usage::new(self.input_tokens, self.output_tokens),
            stop_reason: self.stop_reason,
        })
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> Duration {
        Duration::from_secs(30)
    }

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test", timeout()).unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test", timeout())
            .unwrap()
            .with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn system_extraction_merges_prompt_and_messages() {
        let request = ChatRequest::new(
            "claude-sonnet-4-5",
            vec![
                Message::system("Be concise"),
                Message::user("Hello"),
                Message::assistant("Hi!"),
            ],
        )
        .with_system_prompt("You are helpful");

        let (system, non_system) = AnthropicProvider::extract_system(&request);
        assert_eq!(system.as_deref(), Some("You are helpful\n\nBe concise"));
        assert_eq!(non_system.len(), 2);
        assert_eq!(non_system[0].role, Role::User);
    }

    #[test]
    fn system_extraction_none() {
        let request = ChatRequest::new("claude-sonnet-4-5", vec![Message::user("Hello")]);
        let (system, non_system) = AnthropicProvider::extract_system(&request);
        assert!(system.is_none());
        assert_eq!(non_system.len(), 1);
    }

    #[test]
    fn body_always_streams() {
        let request = ChatRequest::new("claude-sonnet-4-5", vec![Message::user("hi")])
            .with_system_prompt("You are terse.");
        let body = AnthropicProvider::build_body(&request);
        assert_eq!(body["stream"], serde_json::json!(true));
        assert_eq!(body["system"], serde_json::json!("You are terse."));
        assert_eq!(body["max_tokens"], serde_json::json!(DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn parse_message_start() {
        let line = r#"data: {"type":"message_start","message":{"model":"claude-sonnet-4-5","usage":{"input_tokens":25}}}"#;
        assert_eq!(
            parse_sse_line(line),
            Some(SseEvent::MessageStart {
                model: Some("claude-sonnet-4-5".into()),
                input_tokens: 25
            })
        );
    }

    #[test]
    fn parse_text_delta() {
        let line = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        assert_eq!(parse_sse_line(line), Some(SseEvent::TextDelta("Hello".into())));
    }

    #[test]
    fn parse_message_delta_with_usage() {
        let line = r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":42}}"#;
        assert_eq!(
            parse_sse_line(line),
            Some(SseEvent::MessageDelta {
                stop_reason: Some("end_turn".into()),
                output_tokens: 42
            })
        );
    }

    #[test]
    fn parse_skips_event_lines_blanks_and_comments() {
        assert_eq!(parse_sse_line("event: content_block_delta"), None);
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keepalive"), None);
    }

    #[test]
    fn parse_skips_malformed_frames() {
        assert_eq!(parse_sse_line("data: {not json"), None);
        assert_eq!(
            parse_sse_line(r#"data: {"type":"ping"}"#),
            Some(SseEvent::Ignored)
        );
    }

    #[test]
    fn accumulator_assembles_full_response() {
        let lines = [
            r#"data: {"type":"message_start","message":{"model":"claude-sonnet-4-5","usage":{"input_tokens":10}}}"#,
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text"}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"DONE: "}}"#,
            "data: {not json at all",
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"finished"}}"#,
            r#"data: {"type":"content_block_stop","index":0}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":7}}"#,
            r#"data: {"type":"message_stop"}"#,
        ];

        let mut acc = SseAccumulator::default();
        for line in lines {
            if let Some(event) = parse_sse_line(line) {
                acc.apply(event);
            }
        }

        assert!(acc.stopped);
        let response = acc.into_response("requested-model").unwrap();
        assert_eq!(response.content, "DONE: finished");
        assert_eq!(response.model, "claude-sonnet-4-5");
        assert_eq!(response.usage, Usage::new(10, 7));
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn accumulator_tolerates_out_of_order_frames() {
        // message_delta arriving before any text must not corrupt state
        let mut acc = SseAccumulator::default();
        acc.apply(SseEvent::MessageDelta {
            stop_reason: None,
            output_tokens: 3,
        });
        acc.apply(SseEvent::TextDelta("ok".into()));
        acc.apply(SseEvent::MessageStop);

        let response = acc.into_response("m").unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(response.usage.completion_tokens, 3);
    }

    #[test]
    fn empty_stream_is_malformed() {
        let acc = SseAccumulator::default();
        let err = acc.into_response("m").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }
}
