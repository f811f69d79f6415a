pub(crate) mod auth;
mod handlers;
mod router;

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

use crate::core::engine::WorkflowEngine;
use crate::core::lifecycle::LifecycleComponent;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) engine: Arc<WorkflowEngine>,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) api_host: String,
    pub(crate) api_port: u16,
    pub(crate) api_token: Option<String>,
}

pub struct ApiServerConfig {
    pub engine: Arc<WorkflowEngine>,
    pub log_tx: broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
    pub api_token: Option<String>,
}

/// The HTTP surface. Binds on start and serves until the process exits.
pub struct ApiServer {
    state: AppState,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                engine: config.engine,
                log_tx: config.log_tx,
                api_host: config.api_host,
                api_port: config.api_port,
                api_token: config.api_token,
            },
            task: None,
        }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.state.api_host, self.state.api_port);
        // Bind here so a taken port fails startup instead of a background task.
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let app = router::build_api_router(self.state.clone());

        info!("API Server running at http://{addr}");
        self.task = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server shutting down...");
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_state(api_host: &str, api_token: Option<&str>) -> AppState {
    use crate::core::adapters::AdapterRegistry;
    use crate::core::engine::EngineOptions;
    use crate::core::intent::RuleBasedExtractor;
    use crate::core::vault::CredentialVault;

    let engine = WorkflowEngine::new(
        AdapterRegistry::new(std::time::Duration::from_secs(1)),
        Arc::new(RuleBasedExtractor::new()),
        CredentialVault::ephemeral().unwrap(),
        EngineOptions::default(),
    );
    let (log_tx, _) = broadcast::channel(16);
    AppState {
        engine: Arc::new(engine),
        log_tx,
        api_host: api_host.to_string(),
        api_port: 17890,
        api_token: api_token.map(str::to_string),
    }
}
