use async_trait::async_trait;
use serde_json::{Value, json};

use super::http::{Auth, HttpClient};
use super::{Adapter, AdapterError, HealthStatus, StepResult, required_str, unsupported};
use crate::core::connections::ConnectionSnapshot;
use crate::core::services::ServiceType;
use crate::core::workflow::Step;

const DEFAULT_CHANNEL: &str = "#general";

pub struct SlackAdapter {
    http: HttpClient,
    conn: ConnectionSnapshot,
}

/// Slack answers 200 with `ok: false` on failure.
fn check_ok(body: Value) -> Result<Value, AdapterError> {
    if body["ok"].as_bool() == Some(true) {
        return Ok(body);
    }
    let code = body["error"].as_str().unwrap_or("unknown_error");
    let message = format!("Slack API error: {}", code);
    if code == "ratelimited" {
        Err(AdapterError::transient(message))
    } else {
        Err(AdapterError::permanent(message))
    }
}

impl SlackAdapter {
    pub fn new(http: HttpClient, conn: ConnectionSnapshot) -> Self {
        Self { http, conn }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.conn.base_url, method)
    }

    async fn send_message(&self, step: &Step) -> StepResult {
        let text = required_str(step, "text")?;
        let channel = step
            .param_str("channel")
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CHANNEL);
        let body = self
            .http
            .post(
                &self.url("chat.postMessage"),
                &Auth::Bearer(&self.conn.token),
                &json!({ "channel": channel, "text": text }),
            )
            .await?;
        let body = check_ok(body)?;
        Ok(json!({ "channel": body["channel"], "ts": body["ts"], "text": text }))
    }

    async fn list_channels(&self) -> StepResult {
        let body = self
            .http
            .get(
                &self.url("conversations.list"),
                &Auth::Bearer(&self.conn.token),
                &[("types", "public_channel"), ("limit", "200")],
            )
            .await?;
        let body = check_ok(body)?;
        let channels: Vec<Value> = body["channels"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|c| json!({ "id": c["id"], "name": c["name"] }))
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "count": channels.len(), "channels": channels }))
    }
}

#[async_trait]
impl Adapter for SlackAdapter {
    fn service_type(&self) -> ServiceType {
        ServiceType::Slack
    }

    async fn execute(&self, step: &Step) -> StepResult {
        match step.action() {
            "send_message" => self.send_message(step).await,
            "list_channels" => self.list_channels().await,
            other => Err(unsupported(ServiceType::Slack, other)),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        let res = self
            .http
            .get(&self.url("auth.test"), &Auth::Bearer(&self.conn.token), &[])
            .await
            .and_then(check_ok);
        match res {
            Ok(body) => {
                let who = body["user"].as_str().map(str::to_string);
                let team = body["team"].as_str().unwrap_or("workspace");
                HealthStatus::healthy(format!("Connected to {}", team), who)
            }
            Err(e) => HealthStatus::unhealthy(e.message),
        }
    }
}
