//! Loopback engine
//!
//! Generates the rendered prompt back, one whitespace-delimited piece per
//! unit. It needs no model weights, which makes prompt templates, streaming
//! and admission behaviour observable end to end.

use super::{fragment_channel, EngineOutput, FragmentStream, GenerationFragment, SamplingParams, TextEngine};
use crate::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EchoEngineConfig {
    /// Pause before each fragment
    pub fragment_delay: Duration,
    /// Appended after the last piece when the limit was not hit
    pub end_of_turn_token: String,
}

impl Default for EchoEngineConfig {
    fn default() -> Self {
        Self {
            fragment_delay: Duration::from_millis(20),
            end_of_turn_token: "<|im_end|>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EchoEngine {
    config: EchoEngineConfig,
}

impl EchoEngine {
    pub fn new(config: EchoEngineConfig) -> Self {
        Self { config }
    }

    fn pieces(prompt: &str) -> Vec<String> {
        prompt
            .split_inclusive(char::is_whitespace)
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl TextEngine for EchoEngine {
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<EngineOutput> {
        let pieces = Self::pieces(prompt);
        let taken = pieces.len().min(params.max_tokens);
        let mut text: String = pieces[..taken].concat();
        if taken < params.max_tokens {
            text.push_str(&self.config.end_of_turn_token);
        }

        Ok(EngineOutput {
            text,
            prompt_units: pieces.len(),
            completion_units: taken,
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        params: &SamplingParams,
        cancel: CancellationToken,
    ) -> Result<FragmentStream> {
        let pieces = Self::pieces(prompt);
        let prompt_units = pieces.len();
        let max_tokens = params.max_tokens;
        let delay = self.config.fragment_delay;
        let end_of_turn = self.config.end_of_turn_token.clone();
        let (tx, rx) = fragment_channel(8);

        tokio::spawn(async move {
            let mut units = 0;
            for piece in pieces.into_iter().take(max_tokens) {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(units, "echo generation cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                units += 1;
                if tx.send(Ok(GenerationFragment::new(piece, units))).await.is_err() {
                    return;
                }
            }
            if units < max_tokens && !cancel.is_cancelled() {
                let _ = tx.send(Ok(GenerationFragment::new(end_of_turn, units))).await;
            }
        });

        Ok(FragmentStream {
            prompt_units,
            fragments: rx.boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_tokens: usize) -> SamplingParams {
        SamplingParams {
            max_tokens,
            temperature: 0.0,
            top_p: 1.0,
        }
    }

    fn fast() -> EchoEngine {
        EchoEngine::new(EchoEngineConfig {
            fragment_delay: Duration::ZERO,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_batch_echo() {
        let output = fast().generate("one two three", &params(10)).await.unwrap();
        assert_eq!(output.text, "one two three<|im_end|>");
        assert_eq!(output.prompt_units, 3);
        assert_eq!(output.completion_units, 3);
    }

    #[tokio::test]
    async fn test_batch_respects_limit() {
        let output = fast().generate("one two three", &params(2)).await.unwrap();
        assert_eq!(output.text, "one two ");
        assert_eq!(output.completion_units, 2);
    }

    #[tokio::test]
    async fn test_stream_echo() {
        let stream = fast()
            .generate_stream("a b", &params(10), CancellationToken::new())
            .await
            .unwrap();
        let fragments: Vec<_> = stream.fragments.map(|f| f.unwrap()).collect().await;
        let texts: Vec<_> = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, vec!["a ", "b", "<|im_end|>"]);
        assert_eq!(fragments.last().unwrap().units, 2);
    }

    #[tokio::test]
    async fn test_stream_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stream = fast()
            .generate_stream("a b c", &params(10), cancel)
            .await
            .unwrap();
        let fragments: Vec<_> = stream.fragments.collect().await;
        assert!(fragments.is_empty());
    }
}
