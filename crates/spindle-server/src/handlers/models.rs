//! Model listing handler

use crate::server::ServerState;
use axum::{extract::State, Json};
use serde::Serialize;

/// One entry of `/v1/models`
#[derive(Debug, Clone, Serialize)]
pub struct ModelCard {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelCard>,
}

/// List the single served model
pub async fn list_models(State(state): State<ServerState>) -> Json<ModelList> {
    Json(ModelList {
        object: "list",
        data: vec![ModelCard {
            id: state.config.model.id.clone(),
            object: "model",
            created: state.started_at.timestamp(),
            owned_by: state.config.model.owned_by.clone(),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use spindle_core::engine::ScriptedEngine;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lists_configured_model() {
        let mut config = ServerConfig::default();
        config.model.id = "qwen3-0.6b".to_string();
        config.model.owned_by = "acme".to_string();
        let state = ServerState::new(config, Arc::new(ScriptedEngine::new(["ok"]))).unwrap();

        let Json(list) = list_models(State(state)).await;
        assert_eq!(list.object, "list");
        assert_eq!(list.data.len(), 1);
        assert_eq!(list.data[0].id, "qwen3-0.6b");
        assert_eq!(list.data[0].owned_by, "acme");
    }
}
