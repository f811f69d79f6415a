//! Per-user, per-service credentials.
//!
//! At most one [`Connection`] exists per `(user_id, service_type)`. Tokens are
//! sealed with the [`CredentialVault`] while stored and only opened into a
//! [`ConnectionSnapshot`] at dispatch time.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::adapters::{AdapterRegistry, HealthStatus};
use crate::core::error::EngineError;
use crate::core::services::{ConnectFields, ServiceType, descriptor, validate_fields};
use crate::core::vault::CredentialVault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Failed,
}

#[derive(Clone)]
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub service_type: ServiceType,
    pub base_url: String,
    pub username: Option<String>,
    pub config: serde_json::Map<String, serde_json::Value>,
    pub status: ConnectionStatus,
    pub connected_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    sealed_token: String,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("service_type", &self.service_type)
            .field("base_url", &self.base_url)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: self.id.clone(),
            service_type: self.service_type,
            display_name: descriptor(self.service_type).display_name,
            base_url: self.base_url.clone(),
            username: self.username.clone(),
            status: self.status,
            connected_at: self.connected_at,
            last_checked_at: self.last_checked_at,
        }
    }
}

/// What callers see. Never carries the credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSummary {
    pub id: String,
    pub service_type: ServiceType,
    pub display_name: &'static str,
    pub base_url: String,
    pub username: Option<String>,
    pub status: ConnectionStatus,
    pub connected_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Plaintext credentials captured for one dispatch. Later connect or
/// disconnect calls do not affect a snapshot already taken.
#[derive(Clone)]
pub struct ConnectionSnapshot {
    pub service_type: ServiceType,
    pub base_url: String,
    pub token: String,
    pub username: Option<String>,
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl fmt::Debug for ConnectionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSnapshot")
            .field("service_type", &self.service_type)
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("username", &self.username)
            .finish()
    }
}

type Key = (String, ServiceType);

pub struct ConnectionRegistry {
    entries: RwLock<HashMap<Key, Connection>>,
    vault: CredentialVault,
}

impl ConnectionRegistry {
    pub fn new(vault: CredentialVault) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            vault,
        }
    }

    /// Validate `fields` against the service descriptor and store the
    /// connection, replacing any previous one for the same service.
    pub async fn connect(
        &self,
        user_id: &str,
        service_type: ServiceType,
        fields: &ConnectFields,
    ) -> Result<Connection, EngineError> {
        let validated = validate_fields(service_type, fields).map_err(EngineError::Validation)?;
        let sealed_token = self
            .vault
            .seal(&validated.token)
            .map_err(|e| EngineError::Store(e.to_string()))?;

        let connection = Connection {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            service_type,
            base_url: validated.base_url,
            username: validated.username,
            config: validated.config,
            status: ConnectionStatus::Connected,
            connected_at: Utc::now(),
            last_checked_at: None,
            sealed_token,
        };

        let replaced = self
            .entries
            .write()
            .await
            .insert((user_id.to_string(), service_type), connection.clone())
            .is_some();
        info!(
            user_id = %user_id,
            service = %service_type,
            replaced,
            "Service connected"
        );
        Ok(connection)
    }

    pub async fn get(&self, user_id: &str, service_type: ServiceType) -> Option<Connection> {
        self.entries
            .read()
            .await
            .get(&(user_id.to_string(), service_type))
            .cloned()
    }

    /// One summary per connected service, in service order.
    pub async fn list(&self, user_id: &str) -> Vec<ConnectionSummary> {
        let entries = self.entries.read().await;
        let mut out: Vec<ConnectionSummary> = entries
            .values()
            .filter(|c| c.user_id == user_id)
            .map(Connection::summary)
            .collect();
        out.sort_by_key(|c| c.service_type);
        out
    }

    /// Services a plan may target. A connection whose last health check
    /// failed does not count.
    pub async fn connected_services(&self, user_id: &str) -> Vec<ServiceType> {
        let entries = self.entries.read().await;
        let mut out: Vec<ServiceType> = entries
            .values()
            .filter(|c| c.user_id == user_id && c.status == ConnectionStatus::Connected)
            .map(|c| c.service_type)
            .collect();
        out.sort();
        out
    }

    pub async fn disconnect(
        &self,
        user_id: &str,
        service_type: ServiceType,
    ) -> Result<(), EngineError> {
        let removed = self
            .entries
            .write()
            .await
            .remove(&(user_id.to_string(), service_type));
        match removed {
            Some(_) => {
                info!(user_id = %user_id, service = %service_type, "Service disconnected");
                Ok(())
            }
            None => Err(EngineError::ConnectionNotFound(service_type)),
        }
    }

    /// Open the credentials for one dispatch.
    pub async fn snapshot(
        &self,
        user_id: &str,
        service_type: ServiceType,
    ) -> Result<ConnectionSnapshot, EngineError> {
        let connection = self
            .get(user_id, service_type)
            .await
            .ok_or(EngineError::ServiceNotConnected(service_type))?;
        self.open(&connection)
    }

    fn open(&self, connection: &Connection) -> Result<ConnectionSnapshot, EngineError> {
        let token = self
            .vault
            .open(&connection.sealed_token)
            .map_err(|e| EngineError::Store(e.to_string()))?;
        Ok(ConnectionSnapshot {
            service_type: connection.service_type,
            base_url: connection.base_url.clone(),
            token,
            username: connection.username.clone(),
            config: connection.config.clone(),
        })
    }

    /// Run the adapter health check and record the outcome on the
    /// connection. Touches nothing but `status` and `last_checked_at`.
    pub async fn test(
        &self,
        user_id: &str,
        service_type: ServiceType,
        adapters: &AdapterRegistry,
    ) -> Result<HealthStatus, EngineError> {
        let connection = self
            .get(user_id, service_type)
            .await
            .ok_or(EngineError::ConnectionNotFound(service_type))?;
        let snapshot = self.open(&connection)?;

        let health = match adapters.resolve(snapshot) {
            Ok(adapter) => {
                match tokio::time::timeout(adapters.timeout(), adapter.health_check()).await {
                    Ok(h) => h,
                    Err(_) => HealthStatus::unhealthy("health check timed out"),
                }
            }
            Err(e) => HealthStatus::unhealthy(e.message),
        };

        let mut entries = self.entries.write().await;
        // The connection may have been replaced while the check ran.
        if let Some(current) = entries.get_mut(&(user_id.to_string(), service_type))
            && current.id == connection.id
        {
            current.status = if health.healthy {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Failed
            };
            current.last_checked_at = Some(Utc::now());
        }
        if !health.healthy {
            warn!(
                user_id = %user_id,
                service = %service_type,
                detail = %health.detail,
                "Connection health check failed"
            );
        }
        Ok(health)
    }
}
