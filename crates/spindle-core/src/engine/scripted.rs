//! Deterministic engine that plays back a fixed fragment script
//!
//! Used by tests across the workspace. It can fail at a chosen fragment, hold
//! every generation at a gate until released, and records the prompts it saw
//! and whether a stream was cancelled.

use super::{fragment_channel, EngineOutput, FragmentStream, GenerationFragment, SamplingParams, TextEngine};
use crate::{CoreError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ScriptedEngine {
    fragments: Arc<Vec<String>>,
    prompt_units: usize,
    fail_at: Option<usize>,
    gate: Option<Arc<Semaphore>>,
    prompts: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: Arc::new(fragments.into_iter().map(Into::into).collect()),
            prompt_units: 0,
            fail_at: None,
            gate: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_prompt_units(mut self, prompt_units: usize) -> Self {
        self.prompt_units = prompt_units;
        self
    }

    /// Fail instead of producing fragment `index`. The batch call fails outright.
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Hold every generation before its first output until [`release`](Self::release)
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Open the gate for all current and future generations
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether a stream producer observed its cancellation token
    pub fn observed_cancellation(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn record(&self, prompt: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
    }

    fn failure(index: usize) -> CoreError {
        CoreError::engine_with_source(
            "ENGINE_SCRIPTED_FAILURE",
            format!("scripted failure at fragment {}", index),
            anyhow::anyhow!("device lost"),
        )
    }
}

async fn pass_gate(gate: &Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        // The permit goes straight back, so one release opens the gate for everyone
        let _ = gate.acquire().await;
    }
}

#[async_trait]
impl TextEngine for ScriptedEngine {
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<EngineOutput> {
        self.record(prompt);
        pass_gate(&self.gate).await;

        let taken = self.fragments.len().min(params.max_tokens);
        if let Some(index) = self.fail_at.filter(|&i| i < taken) {
            return Err(Self::failure(index));
        }

        Ok(EngineOutput {
            text: self.fragments[..taken].concat(),
            prompt_units: self.prompt_units,
            completion_units: taken,
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        params: &SamplingParams,
        cancel: CancellationToken,
    ) -> Result<FragmentStream> {
        self.record(prompt);

        let fragments = Arc::clone(&self.fragments);
        let fail_at = self.fail_at;
        let gate = self.gate.clone();
        let cancelled = Arc::clone(&self.cancelled);
        let max_tokens = params.max_tokens;
        let (tx, rx) = fragment_channel(1);

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled.store(true, Ordering::SeqCst);
                    return;
                }
                _ = pass_gate(&gate) => {}
            }

            for (index, text) in fragments.iter().take(max_tokens).enumerate() {
                let item = if fail_at == Some(index) {
                    Err(Self::failure(index))
                } else {
                    Ok(GenerationFragment::new(text.clone(), index + 1))
                };
                let is_err = item.is_err();

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled.store(true, Ordering::SeqCst);
                        return;
                    }
                    sent = tx.send(item) => {
                        if sent.is_err() || is_err {
                            return;
                        }
                    }
                }
            }
        });

        Ok(FragmentStream {
            prompt_units: self.prompt_units,
            fragments: rx.boxed(),
        })
    }
}
