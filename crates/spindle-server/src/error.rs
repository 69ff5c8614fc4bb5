//! Error types for the Spindle server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use spindle_core::CoreError;
use thiserror::Error;
use tracing::error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    /// HTTP status, OpenAI-style error type and machine-readable code
    pub fn classify(&self) -> (StatusCode, &'static str, Value) {
        match self {
            ServerError::Core(core) => {
                let (status, kind) = match core {
                    CoreError::Overloaded { .. } => {
                        (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded")
                    }
                    CoreError::InvalidRequest { .. } => {
                        (StatusCode::BAD_REQUEST, "invalid_request_error")
                    }
                    CoreError::Engine { .. } | CoreError::Configuration { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "server_error")
                    }
                };
                (status, kind, json!(core.code()))
            }
            ServerError::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                json!(StatusCode::BAD_REQUEST.as_u16()),
            ),
            ServerError::Config(_) | ServerError::Io(_) | ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                json!(StatusCode::INTERNAL_SERVER_ERROR.as_u16()),
            ),
        }
    }

    /// Message without the variant prefix where one is available
    fn client_message(&self) -> String {
        match self {
            ServerError::Core(core) => core.message().to_string(),
            ServerError::InvalidRequest(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = self.classify();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let mut body = json!({
            "error": {
                "message": self.client_message(),
                "type": error_type,
                "code": code,
            }
        });
        if let ServerError::Core(CoreError::InvalidRequest {
            parameter_name: Some(param),
            ..
        }) = &self
        {
            body["error"]["param"] = json!(param);
        }

        (status, Json(body)).into_response()
    }
}
