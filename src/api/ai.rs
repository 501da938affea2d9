//! Turn processing endpoint

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::history::ChatTurn;
use crate::orchestrator::TurnReply;

/// Build AI router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/process", post(process))
        .with_state(state)
}

/// One prior exchange as sent by clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub robin: String,
}

impl From<&ChatTurn> for HistoryEntry {
    fn from(turn: &ChatTurn) -> Self {
        Self {
            user: turn.user_text.clone(),
            robin: turn.reply_text.clone(),
        }
    }
}

/// Turn processing request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

async fn process(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<TurnReply>, ApiError> {
    let user_message = request
        .user_message
        .filter(|m| !m.trim().is_empty())
        .ok_or(ApiError::BadRequest("پیام کاربر الزامی است"))?;

    let history: Vec<ChatTurn> = request
        .history
        .into_iter()
        .map(|h| ChatTurn::new(h.user, h.robin))
        .collect();

    tracing::debug!(history = history.len(), "processing turn");

    let reply = state
        .processor
        .process(&user_message, &history)
        .await
        .map_err(ApiError::Orchestration)?;

    Ok(Json(reply))
}
