use async_trait::async_trait;
use serde_json::{Value, json};

use super::http::{Auth, HttpClient};
use super::{Adapter, AdapterError, HealthStatus, StepResult, required_str, unsupported};
use crate::core::connections::ConnectionSnapshot;
use crate::core::services::ServiceType;
use crate::core::workflow::Step;

pub struct GithubAdapter {
    http: HttpClient,
    conn: ConnectionSnapshot,
}

impl GithubAdapter {
    pub fn new(http: HttpClient, conn: ConnectionSnapshot) -> Self {
        Self { http, conn }
    }

    fn auth(&self) -> Auth<'_> {
        Auth::Token(&self.conn.token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.conn.base_url, path)
    }

    fn config_str(&self, key: &str) -> Option<&str> {
        self.conn.config.get(key).and_then(|v| v.as_str())
    }

    /// `owner/name` as given, or a bare name qualified with the connection's
    /// `config.owner`, falling back to its username. Without a `repo`
    /// parameter the connection's `config.default_repo` is used.
    fn full_repo(&self, step: &Step) -> Result<String, AdapterError> {
        let repo = step
            .param_str("repo")
            .filter(|r| !r.trim().is_empty())
            .or_else(|| self.config_str("default_repo"))
            .ok_or_else(|| {
                AdapterError::permanent(format!(
                    "{} needs a repo; name one or set config.default_repo on the github connection",
                    step.label()
                ))
            })?;
        if repo.contains('/') {
            return Ok(repo.to_string());
        }
        let owner = self
            .config_str("owner")
            .or(self.conn.username.as_deref())
            .ok_or_else(|| {
                AdapterError::permanent(format!(
                    "repo '{}' has no owner; use owner/name or set config.owner on the github connection",
                    repo
                ))
            })?;
        Ok(format!("{}/{}", owner, repo))
    }

    fn issue_number(step: &Step) -> Result<u64, AdapterError> {
        step.parameters()
            .get("issue_number")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                AdapterError::permanent(format!("{} requires a numeric issue_number", step.label()))
            })
    }

    async fn create_issue(&self, step: &Step) -> StepResult {
        let repo = self.full_repo(step)?;
        let title = required_str(step, "title")?;
        let body = step.param_str("body").unwrap_or_default();
        let issue = self
            .http
            .post(
                &self.url(&format!("/repos/{}/issues", repo)),
                &self.auth(),
                &json!({ "title": title, "body": body }),
            )
            .await?;
        Ok(json!({
            "repo": repo,
            "number": issue["number"],
            "title": issue["title"],
            "url": issue["html_url"],
        }))
    }

    async fn list_issues(&self, step: &Step) -> StepResult {
        let repo = self.full_repo(step)?;
        let issues = self
            .http
            .get(
                &self.url(&format!("/repos/{}/issues", repo)),
                &self.auth(),
                &[("state", "open"), ("per_page", "50")],
            )
            .await?;
        let items: Vec<Value> = issues
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|i| {
                        json!({
                            "number": i["number"],
                            "title": i["title"],
                            "state": i["state"],
                            "url": i["html_url"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "repo": repo, "count": items.len(), "issues": items }))
    }

    async fn get_issue(&self, step: &Step) -> StepResult {
        let repo = self.full_repo(step)?;
        let number = Self::issue_number(step)?;
        let issue = self
            .http
            .get(
                &self.url(&format!("/repos/{}/issues/{}", repo, number)),
                &self.auth(),
                &[],
            )
            .await?;
        Ok(json!({
            "repo": repo,
            "number": issue["number"],
            "title": issue["title"],
            "state": issue["state"],
            "body": issue["body"],
            "url": issue["html_url"],
        }))
    }

    async fn comment_issue(&self, step: &Step) -> StepResult {
        let repo = self.full_repo(step)?;
        let number = Self::issue_number(step)?;
        let body = required_str(step, "body")?;
        let comment = self
            .http
            .post(
                &self.url(&format!("/repos/{}/issues/{}/comments", repo, number)),
                &self.auth(),
                &json!({ "body": body }),
            )
            .await?;
        Ok(json!({
            "repo": repo,
            "issue_number": number,
            "comment_id": comment["id"],
            "url": comment["html_url"],
        }))
    }

    async fn list_branches(&self, step: &Step) -> StepResult {
        let repo = self.full_repo(step)?;
        let branches = self
            .http
            .get(
                &self.url(&format!("/repos/{}/branches", repo)),
                &self.auth(),
                &[("per_page", "100")],
            )
            .await?;
        let names: Vec<Value> = branches
            .as_array()
            .map(|list| list.iter().map(|b| b["name"].clone()).collect())
            .unwrap_or_default();
        Ok(json!({ "repo": repo, "branches": names }))
    }

    async fn get_branch(&self, step: &Step) -> StepResult {
        let repo = self.full_repo(step)?;
        let branch = required_str(step, "branch")?;
        let info = self
            .http
            .get(
                &self.url(&format!(
                    "/repos/{}/branches/{}",
                    repo,
                    urlencoding::encode(branch)
                )),
                &self.auth(),
                &[],
            )
            .await?;
        Ok(json!({
            "repo": repo,
            "branch": info["name"],
            "sha": info["commit"]["sha"],
            "protected": info["protected"],
        }))
    }

    /// Resolve the source branch head, then create `refs/heads/<branch>` at it.
    async fn create_branch(&self, step: &Step) -> StepResult {
        let repo = self.full_repo(step)?;
        let branch = required_str(step, "branch")?;
        let source = step
            .param_str("source_branch")
            .filter(|s| !s.is_empty())
            .unwrap_or("main");

        let head = self
            .http
            .get(
                &self.url(&format!("/repos/{}/git/refs/heads/{}", repo, source)),
                &self.auth(),
                &[],
            )
            .await?;
        let sha = head["object"]["sha"].as_str().ok_or_else(|| {
            AdapterError::permanent(format!("source branch '{}' has no commit sha", source))
        })?;

        self.http
            .post(
                &self.url(&format!("/repos/{}/git/refs", repo)),
                &self.auth(),
                &json!({ "ref": format!("refs/heads/{}", branch), "sha": sha }),
            )
            .await?;
        Ok(json!({
            "repo": repo,
            "branch": branch,
            "source_branch": source,
            "sha": sha,
        }))
    }

    async fn list_repos(&self) -> StepResult {
        let repos = self
            .http
            .get(
                &self.url("/user/repos"),
                &self.auth(),
                &[("per_page", "100"), ("sort", "updated")],
            )
            .await?;
        let items: Vec<Value> = repos
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|r| {
                        json!({
                            "name": r["full_name"],
                            "private": r["private"],
                            "url": r["html_url"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "count": items.len(), "repos": items }))
    }
}

#[async_trait]
impl Adapter for GithubAdapter {
    fn service_type(&self) -> ServiceType {
        ServiceType::Github
    }

    async fn execute(&self, step: &Step) -> StepResult {
        match step.action() {
            "create_issue" => self.create_issue(step).await,
            "list_issues" => self.list_issues(step).await,
            "get_issue" => self.get_issue(step).await,
            "comment_issue" => self.comment_issue(step).await,
            "list_branches" => self.list_branches(step).await,
            "get_branch" => self.get_branch(step).await,
            "create_branch" => self.create_branch(step).await,
            "list_repos" => self.list_repos().await,
            other => Err(unsupported(ServiceType::Github, other)),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        match self.http.get(&self.url("/user"), &self.auth(), &[]).await {
            Ok(user) => {
                let login = user["login"].as_str().map(str::to_string);
                HealthStatus::healthy("GitHub token accepted", login)
            }
            Err(e) => HealthStatus::unhealthy(e.message),
        }
    }
}
