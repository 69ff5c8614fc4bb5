//! Core server implementation

use crate::{
    config::ServerConfig,
    error::{ServerError, ServerResult},
    handlers,
    middleware::{cors_layer, logging_middleware},
};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use spindle_core::{engine::TextEngine, pipeline::GenerationPipeline};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};

/// Main server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub pipeline: Arc<GenerationPipeline>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    /// Validate the configuration and build the pipeline around `engine`
    pub fn new(config: ServerConfig, engine: Arc<dyn TextEngine>) -> ServerResult<Self> {
        config.validate()?;
        let pipeline = GenerationPipeline::new(config.pipeline_config(), engine, config.build_formatter())?;

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            started_at: Utc::now(),
        })
    }
}

/// Build the router with all routes and middleware
pub fn create_router(state: ServerState) -> Router {
    let config = Arc::clone(&state.config);

    let router = Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/v1/models", get(handlers::models::list_models))
        .route("/v1/chat/completions", post(handlers::chat::chat_completions))
        .layer(middleware::from_fn(logging_middleware))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.limits.max_body_size))
        .layer(TraceLayer::new_for_http());

    let router = if config.cors.enabled {
        router.layer(cors_layer(&config.cors))
    } else {
        router
    };

    router.with_state(state)
}

/// Spindle HTTP server
pub struct SpindleServer {
    state: ServerState,
}

impl SpindleServer {
    /// Create a server backed by the engine named in the configuration
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let engine = config.build_engine();
        Self::with_engine(config, engine)
    }

    /// Create a server around a caller-supplied engine
    pub fn with_engine(config: ServerConfig, engine: Arc<dyn TextEngine>) -> ServerResult<Self> {
        Ok(Self {
            state: ServerState::new(config, engine)?,
        })
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Get server state
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Serve until a shutdown signal arrives
    pub async fn start(self) -> ServerResult<()> {
        let app = self.router();
        let addr = self.config().bind;

        info!(model = %self.config().model.id, "Starting Spindle server on {}", addr);

        let listener = TcpListener::bind(addr).await?;

        info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
}

/// Run server with graceful shutdown handling
pub async fn run_server(server: SpindleServer) -> ServerResult<()> {
    server.start().await.map_err(|e| {
        error!("Server error: {}", e);
        e
    })
}
