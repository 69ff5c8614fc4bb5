//! Immutable pipeline configuration, captured once at startup

use crate::{reasoning::ReasoningExtractor, CoreError, Result};
use serde::{Deserialize, Serialize};

/// Everything the pipeline needs to know about the deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Model identifier requests must name
    pub model_id: String,

    /// Maximum number of concurrent generations
    pub max_concurrent: usize,

    /// Upper bound accepted for a request's max_tokens
    pub max_tokens_limit: usize,

    /// Literal control token stripped from engine output
    pub end_of_turn_token: String,

    /// Reasoning section handling
    pub reasoning: ReasoningConfig,
}

/// Which reasoning parser is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    /// Output is passed through untouched
    None,
    /// `<think>`-style marker pair
    DeepseekR1,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub parser: ReasoningMode,
    pub open_marker: String,
    pub close_marker: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_id: "spindle-echo".to_string(),
            max_concurrent: 100,
            max_tokens_limit: 4096,
            end_of_turn_token: "<|im_end|>".to_string(),
            reasoning: ReasoningConfig::default(),
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            parser: ReasoningMode::None,
            open_marker: "<think>".to_string(),
            close_marker: "</think>".to_string(),
        }
    }
}

impl ReasoningConfig {
    /// A fresh extractor for one request, or `None` when parsing is off
    pub fn extractor(&self) -> Option<ReasoningExtractor> {
        match self.parser {
            ReasoningMode::None => None,
            ReasoningMode::DeepseekR1 => Some(ReasoningExtractor::new(
                self.open_marker.clone(),
                self.close_marker.clone(),
            )),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(CoreError::configuration(
                "CONFIG_EMPTY_MODEL_ID",
                "model id must not be empty",
                "model_id",
            ));
        }
        if self.max_concurrent == 0 {
            return Err(CoreError::configuration(
                "CONFIG_ZERO_CONCURRENCY",
                "max_concurrent must be at least 1",
                "max_concurrent",
            ));
        }
        if self.max_tokens_limit == 0 {
            return Err(CoreError::configuration(
                "CONFIG_ZERO_TOKEN_LIMIT",
                "max_tokens_limit must be at least 1",
                "max_tokens_limit",
            ));
        }
        if self.reasoning.parser != ReasoningMode::None {
            let r = &self.reasoning;
            if r.open_marker.is_empty() || r.close_marker.is_empty() {
                return Err(CoreError::configuration(
                    "CONFIG_EMPTY_MARKER",
                    "reasoning markers must not be empty",
                    "reasoning",
                ));
            }
            if r.open_marker == r.close_marker {
                return Err(CoreError::configuration(
                    "CONFIG_IDENTICAL_MARKERS",
                    "reasoning open and close markers must differ",
                    "reasoning",
                ));
            }
        }
        Ok(())
    }
}
