//! Utterance -> [`Plan`].
//!
//! An [`IntentExtractor`] proposes raw steps; [`IntentCompiler`] checks them
//! against the user's connections and the step bound and normalizes their
//! parameters. Nothing here creates a workflow record.

pub mod llm;
pub mod normalize;
pub mod rules;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::error::EngineError;
use crate::core::services::ServiceType;
use crate::core::workflow::{Plan, Step};

pub use llm::{LlmIntentExtractor, LlmWireFormat};
pub use rules::RuleBasedExtractor;

const NO_ACTION_REPLY: &str = "I'm not sure what to do with that. Try asking me to create an issue, \
create a branch, trigger a build or send a message.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// `user` or `assistant`.
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// What the extractor may look at besides the utterance.
#[derive(Debug, Clone, Default)]
pub struct IntentContext {
    pub user_id: String,
    pub connected_services: Vec<ServiceType>,
    /// Oldest first, already bounded by the caller.
    pub history: Vec<ChatTurn>,
}

/// Raw extractor output. `steps` is left as JSON so malformed output can be
/// reported instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Inference {
    #[serde(alias = "response")]
    pub reply: Option<String>,
    #[serde(alias = "workflow_title")]
    pub title: Option<String>,
    pub steps: Value,
}

#[async_trait]
pub trait IntentExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn infer(&self, utterance: &str, ctx: &IntentContext) -> Result<Inference>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Compiled {
    Plan { plan: Plan, reply: Option<String> },
    /// Nothing actionable; answer in chat only.
    Reply(String),
}

pub fn default_title() -> String {
    format!(
        "Automated Workflow - {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M")
    )
}

pub struct IntentCompiler {
    extractor: Arc<dyn IntentExtractor>,
    max_steps: usize,
}

impl IntentCompiler {
    pub fn new(extractor: Arc<dyn IntentExtractor>, max_steps: usize) -> Self {
        Self {
            extractor,
            max_steps,
        }
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    /// Either the whole plan compiles or nothing does: one bad or
    /// unconnected step fails the lot.
    pub async fn compile(
        &self,
        utterance: &str,
        ctx: &IntentContext,
    ) -> Result<Compiled, EngineError> {
        let inference = self.extractor.infer(utterance, ctx).await.map_err(|e| {
            warn!(extractor = self.extractor.name(), "Intent extraction failed: {:#}", e);
            EngineError::UnresolvableIntent(e.to_string())
        })?;

        let raw_steps = match &inference.steps {
            Value::Null => None,
            Value::Array(items) if items.is_empty() => None,
            Value::Array(items) => Some(items),
            other => {
                return Err(EngineError::UnresolvableIntent(format!(
                    "expected a list of steps, got {}",
                    json_kind(other)
                )));
            }
        };
        let Some(raw_steps) = raw_steps else {
            let reply = inference
                .reply
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| NO_ACTION_REPLY.to_string());
            return Ok(Compiled::Reply(reply));
        };

        if raw_steps.len() > self.max_steps {
            return Err(EngineError::PlanTooLarge {
                steps: raw_steps.len(),
                max: self.max_steps,
            });
        }

        let parsed = raw_steps
            .iter()
            .enumerate()
            .map(|(i, raw)| parse_step(raw).map_err(|e| format!("step {}: {}", i + 1, e)))
            .collect::<Result<Vec<_>, String>>()
            .map_err(EngineError::UnresolvableIntent)?;

        if let Some((service, _, _)) = parsed
            .iter()
            .find(|(service, _, _)| !ctx.connected_services.contains(service))
        {
            return Err(EngineError::ServiceNotConnected(*service));
        }

        let mut steps = Vec::with_capacity(parsed.len());
        for (i, (service, action, params)) in parsed.into_iter().enumerate() {
            let params = normalize::normalize(service, &action, params)
                .map_err(|e| EngineError::UnresolvableIntent(format!("step {}: {}", i + 1, e)))?;
            steps.push(Step::new(service, &action, params));
        }

        let title = inference
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(default_title);
        debug!(
            extractor = self.extractor.name(),
            steps = steps.len(),
            title = %title,
            "Compiled plan"
        );
        Ok(Compiled::Plan {
            plan: Plan { title, steps },
            reply: inference.reply.filter(|r| !r.trim().is_empty()),
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn parse_step(raw: &Value) -> Result<(ServiceType, String, Map<String, Value>), String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", json_kind(raw)))?;

    let service_name = obj
        .get("service_type")
        .or_else(|| obj.get("service"))
        .and_then(Value::as_str)
        .ok_or("missing service_type")?;
    let service = ServiceType::from_name(service_name)
        .ok_or_else(|| format!("unknown service '{}'", service_name))?;

    let action = obj
        .get("action")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or("missing action")?
        .to_string();

    let params = match obj.get("parameters") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(format!(
                "parameters must be an object, got {}",
                json_kind(other)
            ));
        }
    };
    Ok((service, action, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Canned(std::result::Result<Inference, String>);

    #[async_trait]
    impl IntentExtractor for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn infer(&self, _utterance: &str, _ctx: &IntentContext) -> Result<Inference> {
            self.0.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn compiler(steps: Value) -> IntentCompiler {
        IntentCompiler::new(
            Arc::new(Canned(Ok(Inference {
                steps,
                ..Default::default()
            }))),
            3,
        )
    }

    fn ctx(services: &[ServiceType]) -> IntentContext {
        IntentContext {
            user_id: "alice".into(),
            connected_services: services.to_vec(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn compiles_and_normalizes_connected_steps() {
        let c = compiler(json!([
            { "service_type": "code_host", "action": "create_issue", "parameters": { "title": "X" } },
            { "service_type": "slack", "action": "send_message", "parameters": { "message": "done" } }
        ]));
        let out = c
            .compile("x", &ctx(&[ServiceType::Github, ServiceType::Slack]))
            .await
            .unwrap();
        let Compiled::Plan { plan, reply } = out else {
            panic!("expected a plan");
        };
        assert!(reply.is_none());
        assert!(plan.title.starts_with("Automated Workflow - "));
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].service_type(), ServiceType::Github);
        assert_eq!(plan.steps[0].param_str("title"), Some("X"));
        assert_eq!(plan.steps[1].param_str("text"), Some("done"));
        assert_eq!(plan.steps[1].param_str("channel"), Some("#general"));
    }

    #[tokio::test]
    async fn any_unconnected_service_fails_the_whole_compile() {
        let c = compiler(json!([
            { "service_type": "github", "action": "list_repos" },
            { "service_type": "jenkins", "action": "list_jobs" }
        ]));
        let err = c.compile("x", &ctx(&[ServiceType::Github])).await.unwrap_err();
        assert_eq!(err, EngineError::ServiceNotConnected(ServiceType::Jenkins));
    }

    #[tokio::test]
    async fn too_many_steps_is_rejected_not_truncated() {
        let step = json!({ "service_type": "github", "action": "list_repos" });
        let c = compiler(json!([step, step, step, step]));
        let err = c.compile("x", &ctx(&[ServiceType::Github])).await.unwrap_err();
        assert_eq!(err, EngineError::PlanTooLarge { steps: 4, max: 3 });
    }

    #[tokio::test]
    async fn malformed_output_is_unresolvable() {
        for steps in [
            json!("create an issue"),
            json!([{ "action": "create_issue" }]),
            json!([{ "service_type": "gitlab", "action": "x" }]),
            json!([{ "service_type": "github", "action": "list_repos", "parameters": [1] }]),
            json!([{ "service_type": "github", "action": "delete_repo" }]),
            json!([{ "service_type": "github", "action": "get_issue", "parameters": { "issue_number": "soon" } }]),
        ] {
            let err = compiler(steps.clone())
                .compile("x", &ctx(&[ServiceType::Github]))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "unresolvable_intent", "{}", steps);
        }
    }

    #[tokio::test]
    async fn no_steps_is_a_plain_reply() {
        let c = IntentCompiler::new(
            Arc::new(Canned(Ok(Inference {
                reply: Some("Hi there".into()),
                ..Default::default()
            }))),
            3,
        );
        assert_eq!(
            c.compile("hello", &ctx(&[])).await.unwrap(),
            Compiled::Reply("Hi there".into())
        );

        let empty = compiler(json!([]));
        assert!(matches!(
            empty.compile("hm", &ctx(&[])).await.unwrap(),
            Compiled::Reply(_)
        ));
    }

    #[tokio::test]
    async fn extractor_failure_is_unresolvable() {
        let c = IntentCompiler::new(Arc::new(Canned(Err("model offline".into()))), 3);
        let err = c.compile("x", &ctx(&[])).await.unwrap_err();
        assert_eq!(err.kind(), "unresolvable_intent");
        assert!(err.to_string().contains("model offline"));
    }

    #[tokio::test]
    async fn extractor_title_is_kept() {
        let c = IntentCompiler::new(
            Arc::new(Canned(Ok(Inference {
                title: Some(" Release prep ".into()),
                steps: json!([{ "service": "jira", "action": "list_projects" }]),
                ..Default::default()
            }))),
            3,
        );
        let Compiled::Plan { plan, .. } = c.compile("x", &ctx(&[ServiceType::Jira])).await.unwrap()
        else {
            panic!("expected a plan");
        };
        assert_eq!(plan.title, "Release prep");
    }
}
