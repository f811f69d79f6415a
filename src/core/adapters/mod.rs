//! Adapter seam between the executor and concrete services.
//!
//! An [`Adapter`] is built per dispatch from a [`ConnectionSnapshot`], so a
//! concurrent reconnect never changes the credentials of a step already in
//! flight.

pub mod github;
pub mod http;
pub mod jenkins;
pub mod jira;
pub mod slack;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::connections::ConnectionSnapshot;
use crate::core::error::EngineError;
use crate::core::services::ServiceType;
use crate::core::workflow::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Timeouts, connection errors, throttling, 5xx. Worth retrying.
    Transient,
    /// Auth, validation, missing resources. Retrying cannot help.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AdapterError {
    pub class: FailureClass,
    pub message: String,
}

impl AdapterError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class == FailureClass::Transient
    }
}

impl From<AdapterError> for EngineError {
    fn from(err: AdapterError) -> Self {
        match err.class {
            FailureClass::Transient => EngineError::AdapterTransient(err.message),
            FailureClass::Permanent => EngineError::AdapterPermanent(err.message),
        }
    }
}

pub type StepResult = Result<serde_json::Value, AdapterError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

impl HealthStatus {
    pub fn healthy(detail: impl Into<String>, account: Option<String>) -> Self {
        Self {
            healthy: true,
            detail: detail.into(),
            account,
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
            account: None,
        }
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    fn service_type(&self) -> ServiceType;

    async fn execute(&self, step: &Step) -> StepResult;

    async fn health_check(&self) -> HealthStatus;
}

pub type AdapterFactory = Arc<dyn Fn(ConnectionSnapshot) -> Arc<dyn Adapter> + Send + Sync>;

/// Settings shared by every HTTP-backed adapter.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("devcascade/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Service type -> adapter constructor. Registration is open so tests and
/// embedders can swap in their own implementations.
pub struct AdapterRegistry {
    factories: HashMap<ServiceType, AdapterFactory>,
    timeout: Duration,
}

impl AdapterRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            factories: HashMap::new(),
            timeout,
        }
    }

    /// The four built-in HTTP adapters sharing one client.
    pub fn with_defaults(settings: &AdapterSettings) -> anyhow::Result<Self> {
        let client = http::HttpClient::new(settings)?;
        let mut registry = Self::new(settings.timeout);

        let c = client.clone();
        registry.register(
            ServiceType::Github,
            move |snap| Arc::new(github::GithubAdapter::new(c.clone(), snap)),
        );
        let c = client.clone();
        registry.register(
            ServiceType::Jira,
            move |snap| Arc::new(jira::JiraAdapter::new(c.clone(), snap)),
        );
        let c = client.clone();
        registry.register(
            ServiceType::Jenkins,
            move |snap| Arc::new(jenkins::JenkinsAdapter::new(c.clone(), snap)),
        );
        registry.register(
            ServiceType::Slack,
            move |snap| Arc::new(slack::SlackAdapter::new(client.clone(), snap)),
        );
        Ok(registry)
    }

    pub fn register<F>(&mut self, service_type: ServiceType, factory: F)
    where
        F: Fn(ConnectionSnapshot) -> Arc<dyn Adapter> + Send + Sync + 'static,
    {
        self.factories.insert(service_type, Arc::new(factory));
    }

    pub fn resolve(&self, snapshot: ConnectionSnapshot) -> Result<Arc<dyn Adapter>, AdapterError> {
        let factory = self.factories.get(&snapshot.service_type).ok_or_else(|| {
            AdapterError::permanent(format!(
                "no adapter registered for {}",
                snapshot.service_type
            ))
        })?;
        Ok(factory(snapshot))
    }

    /// Upper bound on a single adapter call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Action the adapter does not implement. Never retried.
pub(crate) fn unsupported(service: ServiceType, action: &str) -> AdapterError {
    AdapterError::permanent(format!("{} does not support action '{}'", service, action))
}

pub(crate) fn required_str<'a>(step: &'a Step, key: &str) -> Result<&'a str, AdapterError> {
    step.param_str(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            AdapterError::permanent(format!("{} requires parameter '{}'", step.label(), key))
        })
}
