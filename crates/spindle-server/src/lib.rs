//! Spindle Server - OpenAI-compatible chat completion API
//!
//! This crate exposes the Spindle generation pipeline over HTTP: the
//! `/v1/chat/completions` endpoint in both JSON and server-sent-event form,
//! model listing and health probes.

/// Version of the spindle-server crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;
pub mod wire;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::SpindleServer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        config::*,
        error::*,
        handlers::*,
        middleware::*,
        server::*,
        wire::*,
    };
}
