use async_trait::async_trait;
use serde_json::{Value, json};

use super::http::{Auth, HttpClient};
use super::{Adapter, HealthStatus, StepResult, required_str, unsupported};
use crate::core::connections::ConnectionSnapshot;
use crate::core::services::ServiceType;
use crate::core::workflow::Step;

pub struct JiraAdapter {
    http: HttpClient,
    conn: ConnectionSnapshot,
}

impl JiraAdapter {
    pub fn new(http: HttpClient, conn: ConnectionSnapshot) -> Self {
        Self { http, conn }
    }

    fn auth(&self) -> Auth<'_> {
        Auth::Basic {
            username: self.conn.username.as_deref().unwrap_or_default(),
            secret: &self.conn.token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.conn.base_url, path)
    }

    async fn create_issue(&self, step: &Step) -> StepResult {
        let project_key = required_str(step, "project_key")?;
        let summary = required_str(step, "summary")?;
        let description = step.param_str("description").unwrap_or_default();
        let issue_type = step
            .param_str("issue_type")
            .filter(|t| !t.is_empty())
            .unwrap_or("Task");

        let payload = json!({
            "fields": {
                "project": { "key": project_key },
                "summary": summary,
                "description": description,
                "issuetype": { "name": issue_type },
            }
        });
        let created = self
            .http
            .post(&self.url("/rest/api/2/issue"), &self.auth(), &payload)
            .await?;

        let key = created["key"].as_str().unwrap_or_default();
        Ok(json!({
            "key": key,
            "id": created["id"],
            "summary": summary,
            "url": format!("{}/browse/{}", self.conn.base_url, key),
        }))
    }

    async fn list_projects(&self) -> StepResult {
        let projects = self
            .http
            .get(&self.url("/rest/api/2/project"), &self.auth(), &[])
            .await?;
        let items: Vec<Value> = projects
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|p| json!({ "key": p["key"], "name": p["name"] }))
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "count": items.len(), "projects": items }))
    }
}

#[async_trait]
impl Adapter for JiraAdapter {
    fn service_type(&self) -> ServiceType {
        ServiceType::Jira
    }

    async fn execute(&self, step: &Step) -> StepResult {
        match step.action() {
            "create_issue" => self.create_issue(step).await,
            "list_projects" => self.list_projects().await,
            other => Err(unsupported(ServiceType::Jira, other)),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        match self
            .http
            .get(&self.url("/rest/api/2/myself"), &self.auth(), &[])
            .await
        {
            Ok(me) => {
                let name = me["displayName"]
                    .as_str()
                    .or(me["emailAddress"].as_str())
                    .map(str::to_string);
                HealthStatus::healthy("Jira credentials accepted", name)
            }
            Err(e) => HealthStatus::unhealthy(e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapters::{AdapterSettings, mock_server};
    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
    };

    fn adapter(base_url: String) -> JiraAdapter {
        JiraAdapter::new(
            HttpClient::new(&AdapterSettings::default()).unwrap(),
            ConnectionSnapshot {
                service_type: ServiceType::Jira,
                base_url,
                token: "jira-token".into(),
                username: Some("bot@example.com".into()),
                config: Default::default(),
            },
        )
    }

    #[tokio::test]
    async fn create_issue_sends_fields_payload_with_basic_auth() {
        let app = Router::new().route(
            "/rest/api/2/issue",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert!(
                    headers["authorization"]
                        .to_str()
                        .unwrap()
                        .starts_with("Basic ")
                );
                assert_eq!(body["fields"]["project"]["key"], "OPS");
                assert_eq!(body["fields"]["issuetype"]["name"], "Task");
                (
                    StatusCode::CREATED,
                    Json(json!({ "id": "10001", "key": "OPS-7" })),
                )
            }),
        );
        let base = mock_server::spawn(app).await;
        let jira = adapter(base.clone());

        let step = Step::new(
            ServiceType::Jira,
            "create_issue",
            json!({ "project_key": "OPS", "summary": "Disk full" })
                .as_object()
                .cloned()
                .unwrap(),
        );
        let out = jira.execute(&step).await.unwrap();
        assert_eq!(out["key"], "OPS-7");
        assert_eq!(out["url"], format!("{}/browse/OPS-7", base));
    }

    #[tokio::test]
    async fn missing_summary_is_permanent() {
        let jira = adapter("http://unused".into());
        let step = Step::new(
            ServiceType::Jira,
            "create_issue",
            json!({ "project_key": "OPS" }).as_object().cloned().unwrap(),
        );
        let err = jira.execute(&step).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message.contains("summary"));
    }

    #[tokio::test]
    async fn health_check_reports_display_name() {
        let app = Router::new().route(
            "/rest/api/2/myself",
            get(|| async { Json(json!({ "displayName": "Build Bot" })) }),
        );
        let base = mock_server::spawn(app).await;
        let health = adapter(base).health_check().await;
        assert!(health.healthy);
        assert_eq!(health.account.as_deref(), Some("Build Bot"));
    }
}
