//! OpenAI chat-completion wire format
//!
//! Request parsing, the JSON response document and the server-sent-event
//! encoding of a delta stream. Every SSE body ends with exactly one
//! `data: [DONE]` frame, including bodies that end in an error frame.
//! The handler adds SSE keep-alive comments (`:` lines) during idle
//! stretches; they carry no `data:` payload and clients skip them.

use crate::config::GenerationDefaults;
use axum::response::sse::Event;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use spindle_core::{
    generation::{ChatMessage, ChatRole, FinishReason, GenerationDelta, GenerationRequest, GenerationResult, GenerationStats},
    pipeline::DeltaStream,
    CoreError,
};
use std::convert::Infallible;
use tracing::error;

/// End-of-stream sentinel payload
pub const DONE_SENTINEL: &str = "[DONE]";

/// Body of `POST /v1/chat/completions`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop: Option<StopSpec>,
    #[serde(default)]
    pub stream: bool,
}

/// `stop` may be one string or a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StopSpec {
    One(String),
    Many(Vec<String>),
}

impl StopSpec {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StopSpec::One(stop) => vec![stop],
            StopSpec::Many(stops) => stops,
        }
    }
}

impl ChatCompletionRequest {
    /// Fill omitted sampling parameters from the configured defaults
    pub fn into_generation_request(self, defaults: &GenerationDefaults) -> GenerationRequest {
        GenerationRequest {
            messages: self.messages,
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            stop: self.stop.map(StopSpec::into_vec).unwrap_or_default(),
            stream: self.stream,
        }
    }
}

/// Token usage and timing; times are in seconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_first_token: Option<f64>,
    pub total_time: f64,
    pub tokens_per_second: f64,
}

impl From<&GenerationStats> for Usage {
    fn from(stats: &GenerationStats) -> Self {
        Self {
            prompt_tokens: stats.prompt_units,
            completion_tokens: stats.completion_units,
            total_tokens: stats.total_units(),
            time_to_first_token: stats.time_to_first_token.map(|d| d.as_secs_f64()),
            total_time: stats.total_time.as_secs_f64(),
            tokens_per_second: stats.tokens_per_second(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: FinishReason,
}

/// Non-streaming response document
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Usage,
}

/// Partial message carried by one chunk; absent fields carry nothing new
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<FinishReason>,
}

/// One SSE frame of a streaming response
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Terminal frame of a stream that ended in an engine failure
#[derive(Debug, Clone, Serialize)]
pub struct ErrorFrame {
    pub error: ErrorFrameBody,
    pub finish_reason: FinishReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorFrameBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ErrorFrame {
    pub fn server_error(message: impl Into<String>) -> Self {
        Self {
            error: ErrorFrameBody {
                message: message.into(),
                kind: "server_error",
            },
            finish_reason: FinishReason::Error,
            usage: None,
        }
    }

    pub fn with_usage(mut self, stats: &GenerationStats) -> Self {
        self.usage = Some(Usage::from(stats));
        self
    }
}

/// Identity shared by the response document or every chunk of one completion
#[derive(Debug, Clone)]
pub struct CompletionEnvelope {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl CompletionEnvelope {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
        }
    }

    pub fn response(&self, result: GenerationResult) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: self.id.clone(),
            object: "chat.completion",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: ChatRole::Assistant,
                    content: result.text,
                    reasoning_content: result.reasoning,
                },
                finish_reason: result.finish_reason,
            }],
            usage: Usage::from(&result.stats),
        }
    }

    /// The first chunk of a stream also announces the assistant role
    pub fn chunk(&self, delta: GenerationDelta, first: bool) -> ChatCompletionChunk {
        let usage = delta.finish_reason.map(|_| Usage::from(&delta.stats));
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: first.then_some(ChatRole::Assistant),
                    content: delta.content,
                    reasoning_content: delta.reasoning,
                },
                finish_reason: delta.finish_reason,
            }],
            usage,
        }
    }
}

fn json_event<T: Serialize>(payload: &T) -> Event {
    Event::default().json_data(payload).unwrap_or_else(|e| {
        error!(error = %e, "failed to encode SSE frame");
        Event::default().data(
            r#"{"error":{"message":"failed to encode frame","type":"server_error"},"finish_reason":"error"}"#,
        )
    })
}

fn done_event() -> Event {
    Event::default().data(DONE_SENTINEL)
}

fn error_event(err: &CoreError) -> Event {
    json_event(&ErrorFrame::server_error(err.to_string()))
}

/// Encode a delta stream as SSE frames followed by the sentinel.
///
/// A delta that carries a failure becomes an error frame. It is always the
/// terminal delta, so the sentinel follows it directly.
pub fn sse_events(
    envelope: CompletionEnvelope,
    deltas: DeltaStream,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let mut first = true;
    deltas
        .map(move |mut delta| {
            let event = match delta.error.take() {
                Some(failure) => {
                    error!(code = failure.code, error = %failure, "generation failed while streaming");
                    json_event(&ErrorFrame::server_error(failure.message).with_usage(&delta.stats))
                }
                None => {
                    let chunk = envelope.chunk(delta, first);
                    first = false;
                    json_event(&chunk)
                }
            };
            Ok(event)
        })
        .chain(stream::once(async { Ok(done_event()) }))
}

/// Error frame and sentinel for a stream that failed before its first delta
pub fn sse_error_events(err: &CoreError) -> BoxStream<'static, Result<Event, Infallible>> {
    stream::iter([Ok(error_event(err)), Ok(done_event())]).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use spindle_core::generation::GenerationFailure;
    use std::time::Duration;

    fn stats() -> GenerationStats {
        GenerationStats {
            prompt_units: 4,
            completion_units: 6,
            total_time: Duration::from_millis(500),
            time_to_first_token: Some(Duration::from_millis(100)),
        }
    }

    #[test]
    fn test_stop_accepts_string_or_list() {
        let one: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "stop": "\n"
        }))
        .unwrap();
        assert_eq!(one.stop, Some(StopSpec::One("\n".to_string())));

        let many: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "stop": ["a", "b"]
        }))
        .unwrap();
        let request = many.into_generation_request(&GenerationDefaults::default());
        assert_eq!(request.stop, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_defaults_fill_omitted_parameters() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.0
        }))
        .unwrap();
        let request = request.into_generation_request(&GenerationDefaults::default());
        assert_eq!(request.max_tokens, 100);
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.top_p, 1.0);
        assert!(!request.stream);
    }

    #[test]
    fn test_response_omits_absent_reasoning() {
        let envelope = CompletionEnvelope::new("m");
        let response = envelope.response(GenerationResult {
            text: "hello".to_string(),
            reasoning: None,
            finish_reason: FinishReason::Stop,
            stats: GenerationStats::default(),
        });
        let value = serde_json::to_value(&response).unwrap();
        let message = &value["choices"][0]["message"];
        assert_eq!(message["role"], "assistant");
        assert_eq!(message["content"], "hello");
        assert!(message.get("reasoning_content").is_none());
        assert_eq!(value["object"], "chat.completion");
        assert!(value["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(value["usage"]["tokens_per_second"], 0.0);
    }

    #[test]
    fn test_response_includes_reasoning_and_usage() {
        let envelope = CompletionEnvelope::new("m");
        let response = envelope.response(GenerationResult {
            text: "answer".to_string(),
            reasoning: Some("thought".to_string()),
            finish_reason: FinishReason::Length,
            stats: stats(),
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["choices"][0]["message"]["reasoning_content"], "thought");
        assert_eq!(value["choices"][0]["finish_reason"], "length");
        assert_eq!(value["usage"]["total_tokens"], 10);
        assert_eq!(value["usage"]["total_time"], 0.5);
        assert_eq!(value["usage"]["tokens_per_second"], 12.0);
    }

    #[test]
    fn test_chunk_fields_present_only_with_data() {
        let envelope = CompletionEnvelope::new("m");
        let chunk = envelope.chunk(
            GenerationDelta {
                content: Some("hi".to_string()),
                reasoning: None,
                finish_reason: None,
                stats: stats(),
                error: None,
            },
            false,
        );
        let value = serde_json::to_value(&chunk).unwrap();
        let delta = &value["choices"][0]["delta"];
        assert_eq!(delta, &json!({"content": "hi"}));
        assert_eq!(value["choices"][0]["finish_reason"], Value::Null);
        assert!(value.get("usage").is_none());
        assert_eq!(value["object"], "chat.completion.chunk");
    }

    #[test]
    fn test_terminal_chunk_carries_usage() {
        let envelope = CompletionEnvelope::new("m");
        let chunk = envelope.chunk(
            GenerationDelta {
                content: None,
                reasoning: None,
                finish_reason: Some(FinishReason::Stop),
                stats: stats(),
                error: None,
            },
            true,
        );
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["choices"][0]["delta"], json!({"role": "assistant"}));
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["usage"]["time_to_first_token"], 0.1);
    }

    #[test]
    fn test_error_frame_shape() {
        let value = serde_json::to_value(ErrorFrame::server_error("boom")).unwrap();
        assert_eq!(
            value,
            json!({"error": {"message": "boom", "type": "server_error"}, "finish_reason": "error"})
        );
    }

    #[tokio::test]
    async fn test_failed_delta_becomes_error_frame_then_sentinel() {
        let deltas: DeltaStream = stream::iter(vec![
            GenerationDelta {
                content: Some("a".to_string()),
                reasoning: None,
                finish_reason: None,
                stats: GenerationStats::default(),
                error: None,
            },
            GenerationDelta {
                content: None,
                reasoning: None,
                finish_reason: Some(FinishReason::Error),
                stats: stats(),
                error: Some(GenerationFailure::from(&CoreError::engine("ENGINE_SCRIPTED_FAILURE", "boom"))),
            },
        ])
        .boxed();

        let events: Vec<_> = sse_events(CompletionEnvelope::new("m"), deltas).collect().await;
        assert_eq!(events.len(), 3);

        let errors: Vec<_> = sse_error_events(&CoreError::engine("ENGINE_SCRIPTED_FAILURE", "x"))
            .collect()
            .await;
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_error_frame_carries_usage() {
        let value = serde_json::to_value(ErrorFrame::server_error("boom").with_usage(&stats())).unwrap();
        assert_eq!(value["finish_reason"], "error");
        assert_eq!(value["usage"]["total_tokens"], 10);
    }
}
