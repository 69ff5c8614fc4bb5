//! Contract with the text-generation engine
//!
//! The engine is an external collaborator. It offers a batch call that returns
//! the whole completion and an incremental call that yields raw text fragments
//! in order until it is done. The end of the fragment stream is the engine's
//! terminal signal.

pub mod channel;
pub mod echo;
pub mod scripted;

pub use channel::{fragment_channel, FragmentReceiver, FragmentSender};
pub use echo::{EchoEngine, EchoEngineConfig};
pub use scripted::ScriptedEngine;

use crate::{generation::GenerationRequest, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// Sampling parameters passed through to the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl SamplingParams {
    pub fn from_request(request: &GenerationRequest) -> Self {
        Self {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
        }
    }

    /// Temperature 0 means arg-max selection
    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }

    /// Nucleus threshold the engine should apply; greedy decoding ignores it
    pub fn effective_top_p(&self) -> f32 {
        if self.is_greedy() {
            1.0
        } else {
            self.top_p
        }
    }
}

/// One incremental unit of engine output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationFragment {
    /// Raw text, possibly empty
    pub text: String,
    /// Completion units produced so far, non-decreasing
    pub units: usize,
}

impl GenerationFragment {
    pub fn new(text: impl Into<String>, units: usize) -> Self {
        Self {
            text: text.into(),
            units,
        }
    }
}

/// Output of the batch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    pub text: String,
    pub prompt_units: usize,
    pub completion_units: usize,
}

/// Output of the incremental call: a lazy, finite sequence that cannot be
/// restarted
pub struct FragmentStream {
    pub prompt_units: usize,
    pub fragments: BoxStream<'static, Result<GenerationFragment>>,
}

impl std::fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStream")
            .field("prompt_units", &self.prompt_units)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait TextEngine: Send + Sync {
    /// Generate the full completion for `prompt`
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<EngineOutput>;

    /// Start an incremental generation.
    ///
    /// Once `cancel` fires the engine should stop producing fragments; the
    /// consumer has gone away.
    async fn generate_stream(
        &self,
        prompt: &str,
        params: &SamplingParams,
        cancel: CancellationToken,
    ) -> Result<FragmentStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ChatMessage;

    #[test]
    fn test_greedy_ignores_top_p() {
        let request = GenerationRequest::new(vec![ChatMessage::user("x")])
            .with_temperature(0.0)
            .with_top_p(0.3);
        let params = SamplingParams::from_request(&request);
        assert!(params.is_greedy());
        assert_eq!(params.effective_top_p(), 1.0);
    }

    #[test]
    fn test_sampling_keeps_top_p() {
        let request = GenerationRequest::new(vec![ChatMessage::user("x")])
            .with_temperature(0.7)
            .with_top_p(0.3);
        let params = SamplingParams::from_request(&request);
        assert!(!params.is_greedy());
        assert_eq!(params.effective_top_p(), 0.3);
    }
}
