use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

use crate::core::error::EngineError;
use crate::core::services::{ConnectFields, ServiceType};
use crate::interfaces::web::AppState;
use crate::interfaces::web::auth::UserId;

fn parse_service(raw: &str) -> Result<ServiceType, EngineError> {
    raw.parse::<ServiceType>().map_err(EngineError::Validation)
}

pub async fn list_integrations(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Json<Value> {
    let integrations = state.engine.list_connections(&user_id).await;
    Json(json!({ "success": true, "integrations": integrations }))
}

pub async fn connect_integration(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, EngineError> {
    let service_type = payload
        .get("service_type")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Validation("service_type is required".into()))
        .and_then(parse_service)?;
    // Unknown keys, service_type included, are ignored by ConnectFields.
    let fields: ConnectFields = serde_json::from_value(payload)
        .map_err(|e| EngineError::Validation(format!("invalid connection fields: {}", e)))?;
    let integration = state
        .engine
        .connect_service(&user_id, service_type, &fields)
        .await?;
    Ok(Json(json!({ "success": true, "integration": integration })))
}

pub async fn disconnect_integration(
    Path(service): Path<String>,
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Value>, EngineError> {
    let service_type = parse_service(&service)?;
    state
        .engine
        .disconnect_service(&user_id, service_type)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("{} disconnected", service_type)
    })))
}

pub async fn test_integration(
    Path(service): Path<String>,
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Value>, EngineError> {
    let service_type = parse_service(&service)?;
    let health = state
        .engine
        .test_connection(&user_id, service_type)
        .await?;
    Ok(Json(json!({ "success": health.healthy, "health": health })))
}

pub async fn list_services(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "services": state.engine.list_services() }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "intent_extractor": state.engine.extractor_name(),
    }))
}
