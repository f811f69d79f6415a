mod executor;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::core::adapters::{
    Adapter, AdapterError, AdapterRegistry, HealthStatus, StepResult,
};
use crate::core::connections::ConnectionRegistry;
use crate::core::services::{ConnectFields, ServiceType};
use crate::core::vault::CredentialVault;
use crate::core::workflow::{Plan, PlanExecutor, RetryPolicy, Step, WorkflowStore};

/// What the scripted adapter answers to its next call.
#[derive(Clone)]
pub(super) enum Reply {
    Ok(Value),
    Transient(&'static str),
    Permanent(&'static str),
    /// Never answers; only the executor timeout ends it.
    Hang,
    /// Answers once the notify fires.
    Gate(Arc<Notify>),
}

/// Replies shared by every adapter instance the registry builds. An empty
/// queue answers success.
#[derive(Clone, Default)]
pub(super) struct Script {
    queue: Arc<Mutex<VecDeque<Reply>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Script {
    pub fn push(&self, reply: Reply) {
        self.queue.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct ScriptedAdapter {
    service: ServiceType,
    script: Script,
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn service_type(&self) -> ServiceType {
        self.service
    }

    async fn execute(&self, step: &Step) -> StepResult {
        let label = step
            .param_str("tag")
            .map(str::to_string)
            .unwrap_or_else(|| step.label());
        self.script.calls.lock().unwrap().push(label.clone());
        let reply = self.script.queue.lock().unwrap().pop_front();
        match reply {
            None => Ok(json!({ "done": label })),
            Some(Reply::Ok(v)) => Ok(v),
            Some(Reply::Transient(m)) => Err(AdapterError::transient(m)),
            Some(Reply::Permanent(m)) => Err(AdapterError::permanent(m)),
            Some(Reply::Hang) => std::future::pending::<StepResult>().await,
            Some(Reply::Gate(n)) => {
                n.notified().await;
                Ok(json!({ "done": label }))
            }
        }
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus::healthy("scripted", None)
    }
}

pub(super) struct Harness {
    pub executor: Arc<PlanExecutor>,
    pub connections: Arc<ConnectionRegistry>,
    pub store: Arc<WorkflowStore>,
    pub script: Script,
}

pub(super) const ADAPTER_TIMEOUT: Duration = Duration::from_secs(5);

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        })
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        let script = Script::default();
        let mut adapters = AdapterRegistry::new(ADAPTER_TIMEOUT);
        for service in ServiceType::ALL {
            let script = script.clone();
            adapters.register(
                service,
                move |_snap| {
                    Arc::new(ScriptedAdapter {
                        service,
                        script: script.clone(),
                    })
                },
            );
        }

        let connections = Arc::new(ConnectionRegistry::new(
            CredentialVault::ephemeral().unwrap(),
        ));
        let store = Arc::new(WorkflowStore::new());
        let executor = Arc::new(PlanExecutor::new(
            Arc::new(adapters),
            connections.clone(),
            store.clone(),
            policy,
        ));
        Self {
            executor,
            connections,
            store,
            script,
        }
    }

    pub async fn connect(&self, user_id: &str, service: ServiceType) {
        let fields = ConnectFields {
            base_url: Some("https://tools.example.com".into()),
            token: Some("secret".into()),
            username: Some("bot".into()),
            ..Default::default()
        };
        self.connections
            .connect(user_id, service, &fields)
            .await
            .unwrap();
    }
}

/// Steps tagged `s1`, `s2`, ... so call logs read by position.
pub(super) fn tagged_plan(services: &[(ServiceType, &str)]) -> Plan {
    let steps = services
        .iter()
        .enumerate()
        .map(|(i, (service, action))| {
            let params = json!({ "tag": format!("s{}", i + 1) });
            Step::new(*service, *action, params.as_object().cloned().unwrap())
        })
        .collect();
    Plan {
        title: "test plan".into(),
        steps,
    }
}
