//! Chat completion handler

use crate::{
    error::{ServerError, ServerResult},
    server::ServerState,
    wire::{self, ChatCompletionRequest, CompletionEnvelope},
};
use axum::{
    extract::{rejection::JsonRejection, State},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use spindle_core::CoreError;
use tracing::debug;

/// `POST /v1/chat/completions`
///
/// Overload and validation failures are HTTP errors. Once a streaming
/// response has been chosen, engine failures are reported in-stream.
pub async fn chat_completions(
    State(state): State<ServerState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> ServerResult<Response> {
    let Json(request) = payload.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    debug!(request = ?request, "incoming chat completion request");

    state.pipeline.check_model(&request.model)?;
    let envelope = CompletionEnvelope::new(request.model.clone());
    let generation = request.into_generation_request(&state.config.generation);

    if generation.stream {
        let events = match state.pipeline.stream(generation).await {
            Ok(deltas) => wire::sse_events(envelope, deltas).boxed(),
            Err(err @ CoreError::Engine { .. }) => wire::sse_error_events(&err),
            Err(err) => return Err(err.into()),
        };
        Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
    } else {
        let result = state.pipeline.complete(generation).await?;
        Ok(Json(envelope.response(result)).into_response())
    }
}
