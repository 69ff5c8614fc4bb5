//! Spindle Core - generation pipeline for an OpenAI-compatible façade
//!
//! This crate sits between a text-generation engine and the wire. It bounds
//! concurrent generations, turns the engine's fragment stream into ordered
//! deltas, truncates output at stop sequences, separates reasoning sections
//! from visible text and keeps latency/throughput statistics.

pub mod admission;
pub mod config;
pub mod control;
pub mod engine;
pub mod generation;
pub mod pipeline;
pub mod prompt;
pub mod reasoning;
pub mod stop;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Admission controller has no free slot
    #[error("Overloaded [{code}]: {message}")]
    Overloaded {
        code: &'static str,
        message: String,
        in_flight: usize,
        capacity: usize,
    },

    /// Request rejected before any engine work
    #[error("Invalid request [{code}]: {message}")]
    InvalidRequest {
        code: &'static str,
        message: String,
        parameter_name: Option<String>,
    },

    /// The engine collaborator failed to produce output
    #[error("Engine failure [{code}]: {message}")]
    Engine {
        code: &'static str,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Configuration parsing and validation errors
    #[error("Configuration error [{code}]: {message}")]
    Configuration {
        code: &'static str,
        message: String,
        field_name: Option<String>,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an overload error with the admission counters at rejection time
    pub fn overloaded(in_flight: usize, capacity: usize) -> Self {
        Self::Overloaded {
            code: "ADMISSION_SATURATED",
            message: format!(
                "Too many concurrent requests ({} of {} slots in use), retry later",
                in_flight, capacity
            ),
            in_flight,
            capacity,
        }
    }

    /// Create an invalid request error
    pub fn invalid_request<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::InvalidRequest {
            code,
            message: message.into(),
            parameter_name: None,
        }
    }

    /// Create an invalid request error naming the offending parameter
    pub fn invalid_parameter<S1, S2>(code: &'static str, message: S1, param_name: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::InvalidRequest {
            code,
            message: message.into(),
            parameter_name: Some(param_name.into()),
        }
    }

    /// Create an engine error without an underlying cause
    pub fn engine<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::Engine {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create an engine error wrapping the collaborator's own error
    pub fn engine_with_source<S, E>(code: &'static str, message: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<anyhow::Error>,
    {
        Self::Engine {
            code,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a configuration error for a named field
    pub fn configuration<S1, S2>(code: &'static str, message: S1, field_name: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::Configuration {
            code,
            message: message.into(),
            field_name: Some(field_name.into()),
        }
    }

    /// Get the error code for programmatic handling
    pub fn code(&self) -> &'static str {
        match self {
            Self::Overloaded { code, .. } => code,
            Self::InvalidRequest { code, .. } => code,
            Self::Engine { code, .. } => code,
            Self::Configuration { code, .. } => code,
        }
    }

    /// Human readable message without the code prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Overloaded { message, .. } => message,
            Self::InvalidRequest { message, .. } => message,
            Self::Engine { message, .. } => message,
            Self::Configuration { message, .. } => message,
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Overloaded { .. })
    }
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        admission::{AdmissionController, AdmissionSlot},
        config::{PipelineConfig, ReasoningConfig, ReasoningMode},
        control::ControlTokenFilter,
        engine::{
            EchoEngine, EngineOutput, FragmentStream, GenerationFragment, SamplingParams,
            ScriptedEngine, TextEngine,
        },
        generation::{
            ChatMessage, ChatRole, FinishReason, GenerationDelta, GenerationFailure,
            GenerationRequest, GenerationResult, GenerationStats,
        },
        pipeline::{DeltaStream, GenerationPipeline},
        prompt::{ChatMlFormatter, PlainFormatter, PromptFormatter, PromptTemplate},
        reasoning::{ReasoningExtractor, ReasoningOutput, ReasoningState},
        stop::{StopMatch, StopSequences},
        CoreError, Result,
    };
}
