//! Generation pipeline driving one request from admission to final delta
//!
//! Both modes validate the request, take an admission slot, render the prompt
//! and call the engine. The batch mode post-processes the complete text once.
//! The streaming mode runs every fragment through the control-token filter,
//! the stop-sequence matcher and the reasoning extractor, in that order, and
//! yields a delta whenever new visible text or reasoning becomes available.
//!
//! The admission slot is owned by the request's future (batch) or by the
//! stream's state (streaming), so it is released on every exit path including
//! a consumer that drops the stream half way.

use crate::{
    admission::{AdmissionController, AdmissionSlot},
    config::PipelineConfig,
    control::ControlTokenFilter,
    engine::{GenerationFragment, SamplingParams, TextEngine},
    generation::{
        FinishReason, GenerationDelta, GenerationFailure, GenerationRequest, GenerationResult,
        GenerationStats,
    },
    prompt::PromptFormatter,
    reasoning::{ReasoningExtractor, ReasoningOutput},
    stop::StopSequences,
    CoreError, Result,
};
use futures::stream::{self, BoxStream, StreamExt};
use std::{sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

/// Ordered deltas of one streaming generation. Exactly one, the last, is terminal.
pub type DeltaStream = BoxStream<'static, GenerationDelta>;

pub struct GenerationPipeline {
    config: Arc<PipelineConfig>,
    admission: AdmissionController,
    engine: Arc<dyn TextEngine>,
    formatter: Arc<dyn PromptFormatter>,
}

impl GenerationPipeline {
    pub fn new(
        config: PipelineConfig,
        engine: Arc<dyn TextEngine>,
        formatter: Arc<dyn PromptFormatter>,
    ) -> Result<Self> {
        config.validate()?;
        let admission = AdmissionController::new(config.max_concurrent);
        Ok(Self {
            config: Arc::new(config),
            admission,
            engine,
            formatter,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Reject requests addressed to a model this deployment does not serve
    pub fn check_model(&self, model: &str) -> Result<()> {
        if model != self.config.model_id {
            return Err(CoreError::invalid_parameter(
                "INVALID_MODEL",
                format!("Model {} not found. Available: {}", model, self.config.model_id),
                "model",
            ));
        }
        Ok(())
    }

    pub fn validate_request(&self, request: &GenerationRequest) -> Result<()> {
        if request.messages.is_empty() {
            return Err(CoreError::invalid_parameter(
                "INVALID_MESSAGES",
                "messages must contain at least one message",
                "messages",
            ));
        }
        if request.max_tokens == 0 || request.max_tokens > self.config.max_tokens_limit {
            return Err(CoreError::invalid_parameter(
                "INVALID_MAX_TOKENS",
                format!(
                    "max_tokens {} must be between 1 and {}",
                    request.max_tokens, self.config.max_tokens_limit
                ),
                "max_tokens",
            ));
        }
        if !request.temperature.is_finite() || request.temperature < 0.0 {
            return Err(CoreError::invalid_parameter(
                "INVALID_TEMPERATURE",
                format!("temperature {} must be a finite value >= 0", request.temperature),
                "temperature",
            ));
        }
        if !request.top_p.is_finite() || request.top_p <= 0.0 || request.top_p > 1.0 {
            return Err(CoreError::invalid_parameter(
                "INVALID_TOP_P",
                format!("top_p {} must be in (0, 1]", request.top_p),
                "top_p",
            ));
        }
        Ok(())
    }

    /// Run a request to completion and return the cleaned result
    pub async fn complete(&self, request: GenerationRequest) -> Result<GenerationResult> {
        self.validate_request(&request)?;
        let slot = self.admission.acquire()?;
        let started = Instant::now();
        let span = info_span!("generation", request_id = %new_request_id(), mode = "batch");

        async move {
            let prompt = self.formatter.format(&request.messages);
            let params = SamplingParams::from_request(&request);
            debug!(prompt_len = prompt.len(), max_tokens = params.max_tokens, "invoking engine");

            let output = self.engine.generate(&prompt, &params).await.map_err(|e| {
                error!(error = %e, "generation failed");
                e
            })?;

            let mut text = ControlTokenFilter::new(self.config.end_of_turn_token.as_str())
                .strip_all(&output.text);
            let stopped = StopSequences::new(request.stop.iter().cloned())
                .truncate(&mut text)
                .is_some();
            let extracted = match self.config.reasoning.extractor() {
                Some(mut extractor) => extractor.extract_all(&text),
                None => ReasoningOutput {
                    visible: text,
                    reasoning: None,
                },
            };

            let finish_reason = if !stopped && output.completion_units >= params.max_tokens {
                FinishReason::Length
            } else {
                FinishReason::Stop
            };
            let stats = GenerationStats {
                prompt_units: output.prompt_units,
                completion_units: output.completion_units,
                total_time: started.elapsed(),
                time_to_first_token: None,
            };
            slot.release();

            info!(
                completion_units = stats.completion_units,
                finish_reason = %finish_reason,
                tokens_per_second = stats.tokens_per_second(),
                elapsed_ms = stats.total_time.as_millis() as u64,
                "generation complete"
            );

            Ok(GenerationResult {
                text: extracted.visible,
                reasoning: extracted.reasoning,
                finish_reason,
                stats,
            })
        }
        .instrument(span)
        .await
    }

    /// Start a streaming generation.
    ///
    /// Validation, admission and engine start-up failures are returned here,
    /// before any delta exists. A failure while streaming ends the stream with
    /// a terminal delta carrying `FinishReason::Error` and the failure.
    pub async fn stream(&self, request: GenerationRequest) -> Result<DeltaStream> {
        self.validate_request(&request)?;
        let slot = self.admission.acquire()?;
        let started = Instant::now();
        let span = info_span!("generation", request_id = %new_request_id(), mode = "stream");

        let prompt = self.formatter.format(&request.messages);
        let params = SamplingParams::from_request(&request);
        let cancel = CancellationToken::new();

        let source = self
            .engine
            .generate_stream(&prompt, &params, cancel.clone())
            .instrument(span.clone())
            .await
            .map_err(|e| {
                span.in_scope(|| error!(error = %e, "failed to start generation"));
                e
            })?;

        let state = StreamState {
            slot: Some(slot),
            cancel,
            span,
            fragments: source.fragments,
            control: ControlTokenFilter::new(self.config.end_of_turn_token.as_str()),
            stops: StopSequences::new(request.stop),
            extractor: self.config.reasoning.extractor(),
            accumulated: String::new(),
            emitted: 0,
            max_tokens: params.max_tokens,
            started,
            stats: GenerationStats {
                prompt_units: source.prompt_units,
                ..Default::default()
            },
            finished: false,
        };

        Ok(stream::unfold(state, |mut state| async move {
            let span = state.span.clone();
            let item = state.next_delta().instrument(span).await?;
            Some((item, state))
        })
        .boxed())
    }
}

/// Per-request streaming state, owned by the delta stream
struct StreamState {
    slot: Option<AdmissionSlot>,
    cancel: CancellationToken,
    span: Span,
    fragments: BoxStream<'static, Result<GenerationFragment>>,
    control: ControlTokenFilter,
    stops: StopSequences,
    extractor: Option<ReasoningExtractor>,
    // Control-token-free text received so far; `emitted` bytes of it have
    // been handed to the extractor
    accumulated: String,
    emitted: usize,
    max_tokens: usize,
    started: Instant,
    stats: GenerationStats,
    finished: bool,
}

impl StreamState {
    async fn next_delta(&mut self) -> Option<GenerationDelta> {
        if self.finished {
            return None;
        }

        loop {
            match self.fragments.next().await {
                Some(Ok(fragment)) => {
                    self.stats.completion_units = self.stats.completion_units.max(fragment.units);
                    let limit_hit = self.stats.completion_units >= self.max_tokens;

                    let clean = self.control.feed(&fragment.text);
                    if clean.is_empty() && !limit_hit {
                        continue;
                    }
                    self.accumulated.push_str(&clean);

                    let pending = &self.accumulated[self.emitted..];
                    let safe_end = self.accumulated.len() - self.stops.holdback_len(pending);
                    let stop_at = self
                        .stops
                        .find_earliest(pending)
                        .map(|found| self.emitted + found.offset);

                    // A sequence starting before the match may still complete
                    if stop_at.is_some_and(|at| at <= safe_end) {
                        return Some(self.conclude(FinishReason::Stop));
                    }
                    if limit_hit {
                        return Some(self.conclude(FinishReason::Length));
                    }

                    let output = self.release(safe_end);
                    if output.is_empty() {
                        continue;
                    }
                    return Some(self.delta(output, None));
                }
                Some(Err(e)) => return Some(self.fail(&e)),
                None => {
                    let reason = if self.stats.completion_units >= self.max_tokens {
                        FinishReason::Length
                    } else {
                        FinishReason::Stop
                    };
                    return Some(self.conclude(reason));
                }
            }
        }
    }

    /// Flush every held-back tail, truncate at a stop sequence if one is
    /// present, and build the terminal delta.
    fn conclude(&mut self, mut reason: FinishReason) -> GenerationDelta {
        let tail = self.control.finish();
        self.accumulated.push_str(&tail);

        let end = match self.stops.find_earliest(&self.accumulated[self.emitted..]) {
            Some(found) => {
                reason = FinishReason::Stop;
                self.emitted + found.offset
            }
            None => self.accumulated.len(),
        };

        let mut output = self.release(end);
        if let Some(extractor) = self.extractor.as_mut() {
            output.absorb(extractor.finish());
        }
        self.shutdown();

        let delta = self.delta(output, Some(reason));
        info!(
            completion_units = delta.stats.completion_units,
            finish_reason = %reason,
            tokens_per_second = delta.stats.tokens_per_second(),
            elapsed_ms = delta.stats.total_time.as_millis() as u64,
            "generation complete"
        );
        delta
    }

    /// Terminal delta for an engine failure. Held-back text is discarded.
    fn fail(&mut self, err: &CoreError) -> GenerationDelta {
        error!(
            error = %err,
            completion_units = self.stats.completion_units,
            "generation failed mid-stream"
        );
        self.shutdown();
        self.stats.total_time = self.started.elapsed();
        GenerationDelta::failed(GenerationFailure::from(err), self.stats)
    }

    /// Hand `accumulated[emitted..end]` to the reasoning extractor
    fn release(&mut self, end: usize) -> ReasoningOutput {
        let text = &self.accumulated[self.emitted..end];
        let output = match self.extractor.as_mut() {
            Some(extractor) => extractor.feed(text),
            None => ReasoningOutput {
                visible: text.to_string(),
                reasoning: None,
            },
        };
        self.emitted = end;
        output
    }

    fn delta(&mut self, output: ReasoningOutput, finish_reason: Option<FinishReason>) -> GenerationDelta {
        let elapsed = self.started.elapsed();
        if self.stats.time_to_first_token.is_none() && !output.is_empty() {
            self.stats.time_to_first_token = Some(elapsed);
        }
        self.stats.total_time = elapsed;
        GenerationDelta::new(output.visible, output.reasoning, finish_reason, self.stats)
    }

    /// Stop the engine and give the slot back
    fn shutdown(&mut self) {
        self.finished = true;
        self.cancel.cancel();
        self.fragments = stream::empty().boxed();
        if let Some(slot) = self.slot.take() {
            slot.release();
        }
    }
}

impl Drop for StreamState {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
            self.span.in_scope(|| {
                debug!(
                    completion_units = self.stats.completion_units,
                    "stream dropped before completion, generation cancelled"
                )
            });
        }
    }
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ReasoningMode,
        engine::ScriptedEngine,
        generation::ChatMessage,
        prompt::PlainFormatter,
    };

    fn pipeline(engine: ScriptedEngine, config: PipelineConfig) -> GenerationPipeline {
        GenerationPipeline::new(config, Arc::new(engine), Arc::new(PlainFormatter)).unwrap()
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(vec![ChatMessage::user("hello")])
    }

    fn reasoning_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.reasoning.parser = ReasoningMode::DeepseekR1;
        config
    }

    async fn collect(stream: DeltaStream) -> Vec<GenerationDelta> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_unknown_model_rejected() {
        let pipeline = pipeline(ScriptedEngine::new(["x"]), PipelineConfig::default());
        assert!(pipeline.check_model("spindle-echo").is_ok());
        let err = pipeline.check_model("gpt-4").unwrap_err();
        assert_eq!(err.code(), "INVALID_MODEL");
        assert!(err.message().contains("gpt-4"));
    }

    #[tokio::test]
    async fn test_invalid_parameters_rejected_before_admission() {
        let engine = ScriptedEngine::new(["x"]);
        let pipeline = pipeline(engine.clone(), PipelineConfig::default());

        let cases = vec![
            (GenerationRequest::new(vec![]), "INVALID_MESSAGES"),
            (request().with_max_tokens(0), "INVALID_MAX_TOKENS"),
            (request().with_max_tokens(100_000), "INVALID_MAX_TOKENS"),
            (request().with_temperature(-0.1), "INVALID_TEMPERATURE"),
            (request().with_temperature(f32::NAN), "INVALID_TEMPERATURE"),
            (request().with_top_p(0.0), "INVALID_TOP_P"),
            (request().with_top_p(1.5), "INVALID_TOP_P"),
        ];
        for (request, code) in cases {
            let err = pipeline.complete(request).await.unwrap_err();
            assert_eq!(err.code(), code);
        }
        assert_eq!(engine.calls(), 0);
        assert_eq!(pipeline.admission().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_complete_strips_control_token_and_stops() {
        let engine = ScriptedEngine::new(["Hello", " there", " STOP", " more", "<|im_end|>"])
            .with_prompt_units(4);
        let pipeline = pipeline(engine.clone(), PipelineConfig::default());

        let result = pipeline
            .complete(request().with_stop(["STOP"]))
            .await
            .unwrap();
        assert_eq!(result.text, "Hello there ");
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.stats.prompt_units, 4);
        assert_eq!(result.stats.completion_units, 5);
        assert_eq!(result.stats.total_units(), 9);
        assert!(result.stats.time_to_first_token.is_none());
        assert_eq!(engine.prompts(), vec!["Human: hello\nAssistant: ".to_string()]);
    }

    #[tokio::test]
    async fn test_complete_reports_length() {
        let engine = ScriptedEngine::new(["a", "b", "c"]);
        let pipeline = pipeline(engine, PipelineConfig::default());
        let result = pipeline.complete(request().with_max_tokens(2)).await.unwrap();
        assert_eq!(result.text, "ab");
        assert_eq!(result.finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn test_complete_extracts_reasoning() {
        let engine = ScriptedEngine::new(["<think>\nweigh options\n</think>\n\n", "Answer."]);
        let pipeline = pipeline(engine, reasoning_config());
        let result = pipeline.complete(request()).await.unwrap();
        assert_eq!(result.reasoning.as_deref(), Some("weigh options"));
        assert_eq!(result.text, "Answer.");
    }

    #[tokio::test]
    async fn test_complete_failure_releases_slot() {
        let engine = ScriptedEngine::new(["a"]).failing_at(0);
        let pipeline = pipeline(engine, PipelineConfig::default());
        let err = pipeline.complete(request()).await.unwrap_err();
        assert_eq!(err.code(), "ENGINE_SCRIPTED_FAILURE");
        assert_eq!(pipeline.admission().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_stream_stop_sequence_split_across_fragments() {
        let engine = ScriptedEngine::new(["ab", "ST", "OP cd", "ef"]);
        let pipeline = pipeline(engine, PipelineConfig::default());
        let deltas = collect(pipeline.stream(request().with_stop(["STOP"])).await.unwrap()).await;
        let visible: String = deltas.iter().filter_map(|d| d.content.clone()).collect();
        assert_eq!(visible, "ab");
        let last = deltas.last().unwrap();
        assert_eq!(last.finish_reason, Some(FinishReason::Stop));
        assert_eq!(deltas.iter().filter(|d| d.is_terminal()).count(), 1);
        assert_eq!(pipeline.admission().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_stream_waits_for_earlier_starting_stop() {
        let engine = ScriptedEngine::new(["xab", "c", "d tail"]);
        let pipeline = pipeline(engine, PipelineConfig::default());
        let deltas = collect(pipeline.stream(request().with_stop(["abcd", "c"])).await.unwrap()).await;
        let visible: String = deltas.iter().filter_map(|d| d.content.clone()).collect();
        assert_eq!(visible, "x");
    }

    #[tokio::test]
    async fn test_stream_reasoning_split_markers() {
        let engine = ScriptedEngine::new(["<thi", "nk>reason", "ing</th", "ink>answer"]);
        let pipeline = pipeline(engine, reasoning_config());
        let deltas = collect(pipeline.stream(request()).await.unwrap()).await;

        let reasoning: Vec<_> = deltas.iter().filter_map(|d| d.reasoning.clone()).collect();
        assert_eq!(reasoning, vec!["reasoning".to_string()]);
        let visible: String = deltas.iter().filter_map(|d| d.content.clone()).collect();
        assert_eq!(visible, "answer");
        for delta in &deltas {
            if let Some(content) = &delta.content {
                assert!(!content.contains('<'));
            }
        }
    }

    #[tokio::test]
    async fn test_stream_time_to_first_token_recorded() {
        let engine = ScriptedEngine::new(["", "hi", " there"]);
        let pipeline = pipeline(engine, PipelineConfig::default());
        let deltas = collect(pipeline.stream(request()).await.unwrap()).await;

        assert_eq!(deltas.first().unwrap().content.as_deref(), Some("hi"));
        let last = deltas.last().unwrap();
        assert!(last.stats.time_to_first_token.is_some());
        assert!(last.stats.time_to_first_token.unwrap() <= last.stats.total_time);
        assert_eq!(last.stats.completion_units, 3);
    }

    #[tokio::test]
    async fn test_stream_length_limit() {
        let engine = ScriptedEngine::new(["a", "b", "c", "d"]);
        let pipeline = pipeline(engine, PipelineConfig::default());
        let deltas = collect(pipeline.stream(request().with_max_tokens(2)).await.unwrap()).await;
        let visible: String = deltas.iter().filter_map(|d| d.content.clone()).collect();
        assert_eq!(visible, "ab");
        assert_eq!(deltas.last().unwrap().finish_reason, Some(FinishReason::Length));
    }

    #[tokio::test]
    async fn test_stream_error_is_terminal_delta() {
        let engine = ScriptedEngine::new(["a", "b", "c"]).failing_at(1).with_prompt_units(4);
        let pipeline = pipeline(engine, PipelineConfig::default());
        let deltas = collect(pipeline.stream(request()).await.unwrap()).await;
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].content.as_deref(), Some("a"));

        let last = &deltas[1];
        assert_eq!(last.finish_reason, Some(FinishReason::Error));
        assert!(!last.has_output());
        let failure = last.error.as_ref().unwrap();
        assert_eq!(failure.code, "ENGINE_SCRIPTED_FAILURE");
        assert!(failure.message.contains("scripted failure at fragment 1"));
        assert_eq!(last.stats.prompt_units, 4);
        assert_eq!(last.stats.completion_units, 1);
        assert!(last.stats.time_to_first_token.is_some());
        assert!(deltas[0].error.is_none());
        assert_eq!(pipeline.admission().in_flight(), 0);
    }
}
