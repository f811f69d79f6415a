use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

use crate::core::error::EngineError;
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::UserId;

pub async fn list_workflows(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Value>, EngineError> {
    let workflows = state.engine.list_workflows(&user_id)?;
    Ok(Json(json!({ "success": true, "workflows": workflows })))
}

pub async fn get_workflow(
    Path(id): Path<String>,
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Value>, EngineError> {
    let workflow = state.engine.get_workflow(&user_id, &id)?;
    Ok(Json(json!({ "success": true, "workflow": workflow })))
}

pub async fn retry_workflow(
    Path(id): Path<String>,
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Value>, EngineError> {
    let workflow = state.engine.retry_workflow(&user_id, &id).await?;
    Ok(Json(json!({ "success": true, "workflow": workflow })))
}

pub async fn stats(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Value>, EngineError> {
    let stats = state.engine.stats(&user_id).await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}
