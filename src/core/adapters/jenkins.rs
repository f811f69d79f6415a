use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};

use super::http::{Auth, HttpClient};
use super::{Adapter, HealthStatus, StepResult, required_str, unsupported};
use crate::core::connections::ConnectionSnapshot;
use crate::core::services::ServiceType;
use crate::core::workflow::Step;

pub struct JenkinsAdapter {
    http: HttpClient,
    conn: ConnectionSnapshot,
}

/// `folder/app` -> `/job/folder/job/app`.
fn job_path(job_name: &str) -> String {
    job_name
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| format!("/job/{}", urlencoding::encode(s)))
        .collect()
}

impl JenkinsAdapter {
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

    async fn trigger_build(&self, step: &Step) -> StepResult {
        let job_name = required_str(step, "job_name")?;
        let params: Vec<(String, String)> = step
            .parameters()
            .get("parameters")
            .and_then(|p| p.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| {
                        let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                        (k.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let endpoint = if params.is_empty() {
            "build"
        } else {
            "buildWithParameters"
        };
        let query: Vec<(&str, &str)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.http
            .send(
                Method::POST,
                &self.url(&format!("{}/{}", job_path(job_name), endpoint)),
                &self.auth(),
                &query,
                None,
            )
            .await?;

        Ok(json!({
            "job_name": job_name,
            "queued": true,
            "parameters": step.parameters().get("parameters").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn list_jobs(&self) -> StepResult {
        let data = self
            .http
            .get(
                &self.url("/api/json"),
                &self.auth(),
                &[("tree", "jobs[name,url,buildable,color]")],
            )
            .await?;
        let jobs = data["jobs"].as_array().cloned().unwrap_or_default();
        Ok(json!({ "count": jobs.len(), "jobs": jobs }))
    }

    async fn build_history(&self, step: &Step) -> StepResult {
        let job_name = required_str(step, "job_name")?;
        let data = self
            .http
            .get(
                &self.url(&format!("{}/api/json", job_path(job_name))),
                &self.auth(),
                &[("tree", "builds[number,result,timestamp,duration,url]")],
            )
            .await?;
        let builds = data["builds"].as_array().cloned().unwrap_or_default();
        Ok(json!({ "job_name": job_name, "count": builds.len(), "builds": builds }))
    }
}

#[async_trait]
impl Adapter for JenkinsAdapter {
    fn service_type(&self) -> ServiceType {
        ServiceType::Jenkins
    }

    async fn execute(&self, step: &Step) -> StepResult {
        match step.action() {
            "trigger_build" => self.trigger_build(step).await,
            "list_jobs" => self.list_jobs().await,
            "build_history" => self.build_history(step).await,
            other => Err(unsupported(ServiceType::Jenkins, other)),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        let username = self.conn.username.as_deref().unwrap_or_default();
        let path = format!("/user/{}/api/json", urlencoding::encode(username));
        match self.http.get(&self.url(&path), &self.auth(), &[]).await {
            Ok(user) => {
                let name = user["fullName"].as_str().map(str::to_string);
                HealthStatus::healthy("Jenkins credentials accepted", name)
            }
            Err(e) => HealthStatus::unhealthy(e.message),
        }
    }
}
