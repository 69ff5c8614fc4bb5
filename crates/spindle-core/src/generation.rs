//! Request, result and delta types for a single generation

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// Immutable input to the generation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,

    /// Maximum number of completion units
    pub max_tokens: usize,

    /// Sampling temperature (0.0 = greedy)
    pub temperature: f32,

    /// Top-p (nucleus) sampling threshold
    pub top_p: f32,

    /// Literal sequences that end generation
    #[serde(default)]
    pub stop: Vec<String>,

    #[serde(default)]
    pub stream: bool,
}

impl GenerationRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: 100,
            temperature: 1.0,
            top_p: 1.0,
            stop: Vec::new(),
            stream: false,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Reason generation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// Stop sequence matched or the engine finished on its own
    Stop,

    /// Reached the max_tokens limit
    Length,

    /// Generation failed
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latency and throughput counters for one request
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationStats {
    pub prompt_units: usize,
    pub completion_units: usize,

    /// Wall-clock time since admission
    pub total_time: Duration,

    /// Time from admission to the first visible or reasoning output.
    /// Only tracked for streaming requests.
    pub time_to_first_token: Option<Duration>,
}

impl GenerationStats {
    pub fn total_units(&self) -> usize {
        self.prompt_units + self.completion_units
    }

    /// Completion units per second; zero when no time has elapsed
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.total_time.as_secs_f64();
        if secs > 0.0 {
            self.completion_units as f64 / secs
        } else {
            0.0
        }
    }
}

/// Final output of a non-streaming generation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    /// Visible text with reasoning, control tokens and stop sequences removed
    pub text: String,

    /// Extracted reasoning section, if any
    pub reasoning: Option<String>,

    pub finish_reason: FinishReason,

    pub stats: GenerationStats,
}

/// One step of a streaming generation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDelta {
    /// Newly available visible text; never `Some("")`
    pub content: Option<String>,

    /// Reasoning payload, delivered once
    pub reasoning: Option<String>,

    /// Set on the last delta only
    pub finish_reason: Option<FinishReason>,

    /// Running statistics as of this delta
    pub stats: GenerationStats,

    /// Set together with `FinishReason::Error`
    pub error: Option<GenerationFailure>,
}

/// Engine failure reported by the terminal delta of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationFailure {
    pub code: &'static str,
    pub message: String,
}

impl From<&CoreError> for GenerationFailure {
    fn from(err: &CoreError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl GenerationDelta {
    pub(crate) fn new(
        content: String,
        reasoning: Option<String>,
        finish_reason: Option<FinishReason>,
        stats: GenerationStats,
    ) -> Self {
        Self {
            content: (!content.is_empty()).then_some(content),
            reasoning,
            finish_reason,
            stats,
            error: None,
        }
    }

    pub(crate) fn failed(failure: GenerationFailure, stats: GenerationStats) -> Self {
        Self {
            content: None,
            reasoning: None,
            finish_reason: Some(FinishReason::Error),
            stats,
            error: Some(failure),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }

    pub fn has_output(&self) -> bool {
        self.content.is_some() || self.reasoning.is_some()
    }
}
