//! Server configuration

use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use spindle_core::{
    config::{PipelineConfig, ReasoningConfig},
    engine::{EchoEngine, EchoEngineConfig, TextEngine},
    prompt::{PromptFormatter, PromptTemplate},
};
use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

/// Environment variable prefix, e.g. `SPINDLE_LIMITS__MAX_CONCURRENT=4`
pub const ENV_PREFIX: &str = "SPINDLE";

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server binding address
    pub bind: SocketAddr,

    /// Served model identity
    pub model: ModelConfig,

    /// Sampling defaults and limits
    pub generation: GenerationDefaults,

    /// Reasoning section extraction
    pub reasoning: ReasoningConfig,

    /// Prompt rendering
    pub prompt: PromptConfig,

    /// Engine backend
    pub engine: EngineConfig,

    /// Request limits
    pub limits: RequestLimits,

    /// CORS configuration
    pub cors: CorsConfig,
}

/// Model identity reported to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Identifier requests must name in `model`
    pub id: String,

    /// Owner reported by `/v1/models`
    pub owned_by: String,
}

/// Defaults applied when a request omits a sampling parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,

    /// Largest max_tokens a request may ask for
    pub max_tokens_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub template: PromptTemplate,
}

/// Available engine backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    /// Loopback engine that generates the prompt back
    Echo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: EngineBackend,

    /// Pause between generated fragments
    pub fragment_delay_ms: u64,

    /// Control token the engine emits at the end of its turn
    pub end_of_turn_token: String,
}

/// Request size and concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimits {
    /// Maximum concurrent generations
    pub max_concurrent: usize,

    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,

    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,

    /// Max age for preflight requests in seconds
    pub max_age: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 7088)),
            model: ModelConfig::default(),
            generation: GenerationDefaults::default(),
            reasoning: ReasoningConfig::default(),
            prompt: PromptConfig::default(),
            engine: EngineConfig::default(),
            limits: RequestLimits::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: "spindle-echo".to_string(),
            owned_by: "spindle".to_string(),
        }
    }
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            temperature: 1.0,
            top_p: 1.0,
            max_tokens_limit: 4096,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template: PromptTemplate::ChatMl,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: EngineBackend::Echo,
            fragment_delay_ms: 20,
            end_of_turn_token: "<|im_end|>".to_string(),
        }
    }
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            max_age: 3600,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file, then apply `SPINDLE_*` environment overrides
    pub fn from_file(path: &Path) -> Result<Self, config::ConfigError> {
        Self::load(Some(path))
    }

    /// Layer defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&ServerConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Save configuration to file
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Reject configurations the server cannot start with
    pub fn validate(&self) -> ServerResult<()> {
        self.pipeline_config().validate()?;

        let generation = &self.generation;
        if generation.max_tokens == 0 || generation.max_tokens > generation.max_tokens_limit {
            return Err(ServerError::Config(format!(
                "generation.max_tokens {} must be between 1 and max_tokens_limit {}",
                generation.max_tokens, generation.max_tokens_limit
            )));
        }
        if !generation.temperature.is_finite() || generation.temperature < 0.0 {
            return Err(ServerError::Config(format!(
                "generation.temperature {} must be a finite value >= 0",
                generation.temperature
            )));
        }
        if !(generation.top_p > 0.0 && generation.top_p <= 1.0) {
            return Err(ServerError::Config(format!(
                "generation.top_p {} must be in (0, 1]",
                generation.top_p
            )));
        }
        if self.limits.max_body_size == 0 {
            return Err(ServerError::Config(
                "limits.max_body_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Snapshot of everything the generation pipeline needs
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            model_id: self.model.id.clone(),
            max_concurrent: self.limits.max_concurrent,
            max_tokens_limit: self.generation.max_tokens_limit,
            end_of_turn_token: self.engine.end_of_turn_token.clone(),
            reasoning: self.reasoning.clone(),
        }
    }

    pub fn build_engine(&self) -> Arc<dyn TextEngine> {
        match self.engine.backend {
            EngineBackend::Echo => Arc::new(EchoEngine::new(EchoEngineConfig {
                fragment_delay: Duration::from_millis(self.engine.fragment_delay_ms),
                end_of_turn_token: self.engine.end_of_turn_token.clone(),
            })),
        }
    }

    pub fn build_formatter(&self) -> Arc<dyn PromptFormatter> {
        self.prompt.template.formatter()
    }
}
