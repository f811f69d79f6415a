use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::core::engine::ChatResponse;
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::UserId;

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "prompt")]
    message: String,
}

#[derive(Serialize)]
pub struct ChatEnvelope {
    success: bool,
    #[serde(flatten)]
    response: ChatResponse,
}

/// Always 200. Compile and run failures travel in the body.
pub async fn chat_endpoint(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(payload): Json<ChatRequest>,
) -> Json<ChatEnvelope> {
    let response = state.engine.submit_chat(&user_id, &payload.message).await;
    Json(ChatEnvelope {
        success: response.error.is_none(),
        response,
    })
}
