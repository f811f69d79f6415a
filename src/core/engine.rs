//! The facade every interface talks to.
//!
//! Owns the process-scoped registries and wires compiler, executor and the
//! per-user chat history. Nothing here survives a restart.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::adapters::{AdapterRegistry, HealthStatus};
use crate::core::config::{AppConfig, IntentConfig, IntentProvider};
use crate::core::connections::{ConnectionRegistry, ConnectionSummary};
use crate::core::error::{EngineError, ErrorBody};
use crate::core::intent::{
    ChatTurn, Compiled, IntentCompiler, IntentContext, IntentExtractor, LlmIntentExtractor,
    LlmWireFormat, RuleBasedExtractor,
};
use crate::core::services::{ConnectFields, ServiceDescriptor, ServiceType, all_descriptors};
use crate::core::vault::CredentialVault;
use crate::core::workflow::{
    PlanExecutor, RetryPolicy, StepStatus, WorkflowRecord, WorkflowStatus, WorkflowStore,
    WorkflowSummary,
};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_plan_steps: usize,
    pub history_window: usize,
    pub verify_on_connect: bool,
    pub retry: RetryPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_plan_steps: 10,
            history_window: 10,
            verify_on_connect: false,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_status: Option<WorkflowStatus>,
    /// `service.action` of every step that completed.
    pub actions_taken: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ChatResponse {
    fn reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            workflow_id: None,
            workflow_status: None,
            actions_taken: Vec::new(),
            error: None,
        }
    }

    fn failed(reply: impl Into<String>, err: &EngineError) -> Self {
        Self {
            error: Some(err.body()),
            ..Self::reply(reply)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub integrations_count: usize,
    pub workflows_count: usize,
    pub completed_workflows: usize,
    /// Percentage of completed workflows, two decimals.
    pub success_rate: f64,
}

pub struct WorkflowEngine {
    connections: Arc<ConnectionRegistry>,
    adapters: Arc<AdapterRegistry>,
    store: Arc<WorkflowStore>,
    compiler: IntentCompiler,
    executor: PlanExecutor,
    history: Mutex<HashMap<String, VecDeque<ChatTurn>>>,
    options: EngineOptions,
}

impl WorkflowEngine {
    pub fn new(
        adapters: AdapterRegistry,
        extractor: Arc<dyn IntentExtractor>,
        vault: CredentialVault,
        options: EngineOptions,
    ) -> Self {
        let adapters = Arc::new(adapters);
        let connections = Arc::new(ConnectionRegistry::new(vault));
        let store = Arc::new(WorkflowStore::new());
        let executor = PlanExecutor::new(
            adapters.clone(),
            connections.clone(),
            store.clone(),
            options.retry,
        );
        Self {
            connections,
            adapters,
            store,
            compiler: IntentCompiler::new(extractor, options.max_plan_steps),
            executor,
            history: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Real HTTP adapters and the configured intent extractor.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let settings = config.adapters.settings();
        let adapters = AdapterRegistry::with_defaults(&settings)?;
        let vault = match &config.security.encryption_key {
            Some(material) => CredentialVault::from_material(material)?,
            None => CredentialVault::ephemeral()?,
        };
        let extractor = build_extractor(&config.intent, settings.timeout)?;
        info!(extractor = extractor.name(), "Workflow engine ready");

        Ok(Self::new(
            adapters,
            extractor,
            vault,
            EngineOptions {
                max_plan_steps: config.engine.max_plan_steps,
                history_window: config.engine.history_window,
                verify_on_connect: config.adapters.verify_on_connect,
                retry: config.retry.policy(),
            },
        ))
    }

    /// Compile and run one chat message. Always answers; compile errors
    /// come back as reply text plus the error body and create no workflow.
    pub async fn submit_chat(&self, user_id: &str, message: &str) -> ChatResponse {
        let message = message.trim();
        if message.is_empty() {
            let err = EngineError::Validation("message is empty".into());
            return ChatResponse::failed("Please type a request.", &err);
        }

        let ctx = IntentContext {
            user_id: user_id.to_string(),
            connected_services: self.connections.connected_services(user_id).await,
            history: self.history_for(user_id).await,
        };

        let response = match self.compiler.compile(message, &ctx).await {
            Ok(Compiled::Reply(reply)) => ChatResponse::reply(reply),
            Ok(Compiled::Plan { plan, reply }) => match self.executor.execute(plan, user_id).await
            {
                Ok(record) => describe_run(&record, reply),
                Err(e) => ChatResponse::failed(
                    format!("The workflow could not be tracked to the end: {}", e),
                    &e,
                ),
            },
            Err(e) if e.is_compile_error() => {
                info!(user_id = %user_id, kind = e.kind(), "Chat request not compiled");
                ChatResponse::failed(compile_error_reply(&e), &e)
            }
            Err(e) => {
                warn!(user_id = %user_id, kind = e.kind(), "Chat request failed: {}", e);
                ChatResponse::failed(format!("Something went wrong: {}", e), &e)
            }
        };

        self.remember(user_id, message, &response.reply).await;
        response
    }

    async fn history_for(&self, user_id: &str) -> Vec<ChatTurn> {
        self.history
            .lock()
            .await
            .get(user_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn remember(&self, user_id: &str, message: &str, reply: &str) {
        if self.options.history_window == 0 {
            return;
        }
        let mut history = self.history.lock().await;
        let turns = history.entry(user_id.to_string()).or_default();
        turns.push_back(ChatTurn::user(message));
        turns.push_back(ChatTurn::assistant(reply));
        while turns.len() > self.options.history_window {
            turns.pop_front();
        }
    }

    /// The caller must own the workflow.
    pub fn get_workflow(&self, user_id: &str, id: &str) -> Result<WorkflowRecord, EngineError> {
        let record = self.store.get(id)?;
        if record.user_id != user_id {
            return Err(EngineError::Forbidden(id.to_string()));
        }
        Ok(record)
    }

    pub fn list_workflows(&self, user_id: &str) -> Result<Vec<WorkflowSummary>, EngineError> {
        Ok(self
            .store
            .list(user_id)?
            .iter()
            .map(WorkflowRecord::summary)
            .collect())
    }

    pub async fn retry_workflow(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<WorkflowRecord, EngineError> {
        self.get_workflow(user_id, id)?;
        self.executor.retry(id).await
    }

    pub async fn connect_service(
        &self,
        user_id: &str,
        service_type: ServiceType,
        fields: &ConnectFields,
    ) -> Result<ConnectionSummary, EngineError> {
        let connection = self
            .connections
            .connect(user_id, service_type, fields)
            .await?;
        if !self.options.verify_on_connect {
            return Ok(connection.summary());
        }

        self.connections
            .test(user_id, service_type, &self.adapters)
            .await?;
        Ok(self
            .connections
            .get(user_id, service_type)
            .await
            .map(|c| c.summary())
            .unwrap_or_else(|| connection.summary()))
    }

    pub async fn list_connections(&self, user_id: &str) -> Vec<ConnectionSummary> {
        self.connections.list(user_id).await
    }

    pub async fn disconnect_service(
        &self,
        user_id: &str,
        service_type: ServiceType,
    ) -> Result<(), EngineError> {
        self.connections.disconnect(user_id, service_type).await
    }

    pub async fn test_connection(
        &self,
        user_id: &str,
        service_type: ServiceType,
    ) -> Result<HealthStatus, EngineError> {
        self.connections
            .test(user_id, service_type, &self.adapters)
            .await
    }

    pub fn list_services(&self) -> Vec<&'static ServiceDescriptor> {
        all_descriptors()
    }

    pub async fn stats(&self, user_id: &str) -> Result<Stats, EngineError> {
        let workflows = self.store.list(user_id)?;
        let completed = workflows
            .iter()
            .filter(|w| w.status() == WorkflowStatus::Completed)
            .count();
        let success_rate = if workflows.is_empty() {
            0.0
        } else {
            (completed as f64 * 10_000.0 / workflows.len() as f64).round() / 100.0
        };
        Ok(Stats {
            integrations_count: self.connections.list(user_id).await.len(),
            workflows_count: workflows.len(),
            completed_workflows: completed,
            success_rate,
        })
    }

    pub fn extractor_name(&self) -> &'static str {
        self.compiler.extractor_name()
    }
}

fn build_extractor(
    config: &IntentConfig,
    timeout: std::time::Duration,
) -> Result<Arc<dyn IntentExtractor>> {
    let format = match config.provider {
        IntentProvider::Rules => return Ok(Arc::new(RuleBasedExtractor::new())),
        IntentProvider::Gemini => LlmWireFormat::Gemini,
        IntentProvider::OpenAi => LlmWireFormat::OpenAi,
    };
    let key_env = config.api_key_env();
    let Some(api_key) = std::env::var(key_env)
        .ok()
        .filter(|k| !k.trim().is_empty())
    else {
        warn!(
            "{} is not set; falling back to the rule-based extractor",
            key_env
        );
        return Ok(Arc::new(RuleBasedExtractor::new()));
    };
    Ok(Arc::new(LlmIntentExtractor::new(
        format,
        config.model_or_default(),
        api_key,
        config.base_url.clone(),
        timeout,
    )?))
}

fn compile_error_reply(err: &EngineError) -> String {
    match err {
        EngineError::ServiceNotConnected(service) => format!(
            "That needs {}, which you haven't connected yet. Connect it on the integrations page and ask again.",
            service
        ),
        EngineError::PlanTooLarge { .. } => {
            format!("That's too much for one request: {}. Try splitting it up.", err)
        }
        _ => format!("I couldn't work out what to do: {}", err),
    }
}

fn describe_run(record: &WorkflowRecord, lead: Option<String>) -> ChatResponse {
    let actions_taken: Vec<String> = record
        .steps()
        .iter()
        .filter(|s| s.status() == StepStatus::Completed)
        .map(|s| s.label())
        .collect();
    let failed = record
        .steps()
        .iter()
        .enumerate()
        .find(|(_, s)| s.status() == StepStatus::Failed);

    let outcome = match (record.status(), failed) {
        (WorkflowStatus::Completed, _) => format!(
            "Done. Completed {} action(s): {}.",
            actions_taken.len(),
            actions_taken.join(", ")
        ),
        (status, Some((i, step))) => format!(
            "Workflow {}: {} of {} step(s) completed. Step {} ({}) failed: {}. Retry workflow {} once the problem is fixed.",
            status.as_str(),
            record.completed_steps(),
            record.steps().len(),
            i + 1,
            step.label(),
            step.error().map(|e| e.detail.as_str()).unwrap_or("unknown error"),
            record.id
        ),
        (status, None) => format!("Workflow {} is {}.", record.id, status.as_str()),
    };
    let reply = match lead {
        Some(lead) => format!("{}\n\n{}", lead, outcome),
        None => outcome,
    };

    ChatResponse {
        reply,
        workflow_id: Some(record.id.clone()),
        workflow_status: Some(record.status()),
        actions_taken,
        error: failed.and_then(|(_, s)| s.error().cloned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapters::{Adapter, AdapterError, StepResult};
    use crate::core::intent::Inference;
    use crate::core::workflow::Step;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Succeeds unless a slack message says "boom".
    struct Stub(ServiceType);

    #[async_trait]
    impl Adapter for Stub {
        fn service_type(&self) -> ServiceType {
            self.0
        }

        async fn execute(&self, step: &Step) -> StepResult {
            if step.param_str("text") == Some("boom") {
                return Err(AdapterError::permanent("HTTP 404 from slack: channel_not_found"));
            }
            Ok(json!({ "action": step.action(), "number": 1 }))
        }

        async fn health_check(&self) -> HealthStatus {
            if self.0 == ServiceType::Jenkins {
                HealthStatus::unhealthy("HTTP 401")
            } else {
                HealthStatus::healthy("ok", Some("bot".into()))
            }
        }
    }

    /// Rule-based extraction that also records the history it was given.
    #[derive(Default)]
    struct Recording {
        seen_history: StdMutex<Vec<usize>>,
    }

    #[async_trait]
    impl IntentExtractor for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn infer(&self, utterance: &str, ctx: &IntentContext) -> Result<Inference> {
            self.seen_history.lock().unwrap().push(ctx.history.len());
            RuleBasedExtractor::new().infer(utterance, ctx).await
        }
    }

    fn engine_with(extractor: Arc<dyn IntentExtractor>, options: EngineOptions) -> WorkflowEngine {
        let mut adapters = AdapterRegistry::new(Duration::from_secs(5));
        for service in ServiceType::ALL {
            adapters.register(service, move |_snap| Arc::new(Stub(service)));
        }
        WorkflowEngine::new(
            adapters,
            extractor,
            CredentialVault::ephemeral().unwrap(),
            options,
        )
    }

    fn engine() -> WorkflowEngine {
        engine_with(Arc::new(RuleBasedExtractor::new()), EngineOptions::default())
    }

    fn token(t: &str) -> ConnectFields {
        ConnectFields {
            token: Some(t.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_issue_scenario_completes() {
        let engine = engine();
        engine
            .connect_service("alice", ServiceType::Github, &token("ghp_1"))
            .await
            .unwrap();

        let res = engine.submit_chat("alice", "create an issue titled X").await;
        assert!(res.error.is_none(), "{:?}", res.error);
        assert_eq!(res.actions_taken, vec!["github.create_issue"]);
        assert_eq!(res.workflow_status, Some(WorkflowStatus::Completed));

        let record = engine
            .get_workflow("alice", res.workflow_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(record.steps().len(), 1);
        assert_eq!(record.steps()[0].status(), StepStatus::Completed);
        assert_eq!(record.steps()[0].param_str("title"), Some("X"));
        assert_eq!(record.status(), WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn unconnected_service_replies_and_creates_nothing() {
        let engine = engine();
        let res = engine.submit_chat("alice", "create an issue titled X").await;
        assert!(res.workflow_id.is_none());
        assert_eq!(res.error.unwrap().kind, "service_not_connected");
        assert!(res.reply.contains("github"));
        assert!(engine.list_workflows("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_run_reports_the_failed_step_and_can_be_retried() {
        let engine = engine();
        engine
            .connect_service("alice", ServiceType::Github, &token("ghp_1"))
            .await
            .unwrap();
        engine
            .connect_service("alice", ServiceType::Slack, &token("xoxb"))
            .await
            .unwrap();

        let res = engine
            .submit_chat("alice", "create an issue titled Flaky test and then notify slack 'boom'")
            .await;
        assert_eq!(res.workflow_status, Some(WorkflowStatus::Partial));
        assert_eq!(res.actions_taken, vec!["github.create_issue"]);
        assert_eq!(res.error.unwrap().kind, "adapter_permanent_error");
        assert!(res.reply.contains("Step 2"));

        let id = res.workflow_id.unwrap();
        assert_eq!(
            engine.retry_workflow("bob", &id).await.unwrap_err().kind(),
            "forbidden"
        );
        let retried = engine.retry_workflow("alice", &id).await.unwrap();
        assert_eq!(retried.retry_count(), 1);
        assert_eq!(retried.status(), WorkflowStatus::Partial);
    }

    #[tokio::test]
    async fn plain_chat_is_a_reply_and_history_is_bounded() {
        let recording = Arc::new(Recording::default());
        let engine = engine_with(
            recording.clone(),
            EngineOptions {
                history_window: 4,
                ..Default::default()
            },
        );
        for _ in 0..4 {
            let res = engine.submit_chat("alice", "hello").await;
            assert!(res.workflow_id.is_none());
            assert!(res.reply.starts_with("Hello!"));
        }
        assert_eq!(*recording.seen_history.lock().unwrap(), vec![0, 2, 4, 4]);

        engine.submit_chat("bob", "hi").await;
        assert_eq!(recording.seen_history.lock().unwrap().last(), Some(&0));
    }

    #[tokio::test]
    async fn empty_message_is_a_validation_reply() {
        let res = engine().submit_chat("alice", "   ").await;
        assert_eq!(res.error.unwrap().kind, "validation_error");
    }

    #[tokio::test]
    async fn workflows_are_scoped_to_their_owner() {
        let engine = engine();
        engine
            .connect_service("alice", ServiceType::Github, &token("t"))
            .await
            .unwrap();
        let res = engine.submit_chat("alice", "list branches in repo api").await;
        let id = res.workflow_id.unwrap();

        assert_eq!(
            engine.get_workflow("bob", &id).unwrap_err(),
            EngineError::Forbidden(id.clone())
        );
        assert!(engine.list_workflows("bob").unwrap().is_empty());
        let summaries = engine.list_workflows("alice").unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].step_count, 1);
        assert_eq!(
            engine.get_workflow("alice", "nope").unwrap_err().kind(),
            "workflow_not_found"
        );
    }

    #[tokio::test]
    async fn reconnect_replaces_and_disconnect_removes() {
        let engine = engine();
        engine
            .connect_service("alice", ServiceType::Slack, &token("a"))
            .await
            .unwrap();
        engine
            .connect_service("alice", ServiceType::Slack, &token("b"))
            .await
            .unwrap();
        assert_eq!(engine.list_connections("alice").await.len(), 1);

        engine
            .disconnect_service("alice", ServiceType::Slack)
            .await
            .unwrap();
        assert!(engine.list_connections("alice").await.is_empty());
        assert_eq!(
            engine
                .disconnect_service("alice", ServiceType::Slack)
                .await
                .unwrap_err()
                .kind(),
            "connection_not_found"
        );
    }

    #[tokio::test]
    async fn verify_on_connect_records_a_failed_check() {
        let engine = engine_with(
            Arc::new(RuleBasedExtractor::new()),
            EngineOptions {
                verify_on_connect: true,
                ..Default::default()
            },
        );
        let fields = ConnectFields {
            base_url: Some("https://ci.example".into()),
            username: Some("bot".into()),
            token: Some("t".into()),
            ..Default::default()
        };
        let summary = engine
            .connect_service("alice", ServiceType::Jenkins, &fields)
            .await
            .unwrap();
        assert_eq!(
            summary.status,
            crate::core::connections::ConnectionStatus::Failed
        );
        assert!(summary.last_checked_at.is_some());

        let res = engine.submit_chat("alice", "list jenkins jobs").await;
        assert_eq!(res.error.unwrap().kind, "service_not_connected");
    }

    #[tokio::test]
    async fn stats_count_completed_workflows() {
        let engine = engine();
        engine
            .connect_service("alice", ServiceType::Slack, &token("t"))
            .await
            .unwrap();
        engine.submit_chat("alice", "send a slack message: hi team").await;
        engine.submit_chat("alice", "send a slack message: hello all").await;
        engine.submit_chat("alice", "send a slack message: boom").await;

        let stats = engine.stats("alice").await.unwrap();
        assert_eq!(stats.integrations_count, 1);
        assert_eq!(stats.workflows_count, 3);
        assert_eq!(stats.completed_workflows, 2);
        assert_eq!(stats.success_rate, 66.67);

        let empty = engine.stats("bob").await.unwrap();
        assert_eq!(empty.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_connection_reports_health() {
        let engine = engine();
        engine
            .connect_service("alice", ServiceType::Github, &token("t"))
            .await
            .unwrap();
        let health = engine
            .test_connection("alice", ServiceType::Github)
            .await
            .unwrap();
        assert!(health.healthy);
        assert_eq!(
            engine
                .test_connection("alice", ServiceType::Jira)
                .await
                .unwrap_err()
                .kind(),
            "connection_not_found"
        );
        assert_eq!(engine.list_services().len(), 4);
    }
}
