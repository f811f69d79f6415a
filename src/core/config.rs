use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::core::adapters::AdapterSettings;
use crate::core::workflow::RetryPolicy;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub adapters: AdaptersConfig,

    #[serde(default)]
    pub intent: IntentConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// When set, every `/api/*` route except health needs `Bearer <token>`.
    #[serde(default)]
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_plan_steps")]
    pub max_plan_steps: usize,

    /// Chat turns per user fed back to the extractor.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdaptersConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Run a health check on connect and store the outcome as the status.
    #[serde(default)]
    pub verify_on_connect: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntentProvider {
    #[default]
    Rules,
    Gemini,
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentConfig {
    #[serde(default)]
    pub provider: IntentProvider,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the provider key. Keys never live in the
    /// file. Defaults to the provider's usual variable.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    /// Key material for sealing stored credentials. Random per process when absent.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    17890
}
fn default_max_plan_steps() -> usize {
    10
}
fn default_history_window() -> usize {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("devcascade/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            api_token: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_plan_steps: default_max_plan_steps(),
            history_window: default_history_window(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            verify_on_connect: false,
            user_agent: default_user_agent(),
        }
    }
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            provider: IntentProvider::Rules,
            model: None,
            base_url: None,
            api_key_env: None,
        }
    }
}

impl IntentConfig {
    pub fn api_key_env(&self) -> &str {
        match (&self.api_key_env, self.provider) {
            (Some(name), _) => name,
            (None, IntentProvider::OpenAi) => "OPENAI_API_KEY",
            (None, _) => "GEMINI_API_KEY",
        }
    }

    pub fn model_or_default(&self) -> String {
        self.model.clone().unwrap_or_else(|| {
            match self.provider {
                IntentProvider::OpenAi => "gpt-4o-mini",
                _ => "gemini-1.5-flash",
            }
            .to_string()
        })
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl AdaptersConfig {
    pub fn settings(&self) -> AdapterSettings {
        AdapterSettings {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// `<config dir>/devcascade/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("devcascade").join("config.toml"))
}

impl AppConfig {
    /// Read `path` (or the default location), then apply environment
    /// overrides. A missing file is not an error.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let mut config = match &path {
            Some(p) if p.exists() => {
                let content = tokio::fs::read_to_string(p)
                    .await
                    .with_context(|| format!("reading {}", p.display()))?;
                let config: AppConfig = toml::from_str(&content)
                    .with_context(|| format!("parsing {}", p.display()))?;
                info!("Loaded config from {}", p.display());
                config
            }
            _ => {
                info!("No config file found, using defaults.");
                AppConfig::default()
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// `DEVCASCADE_API_HOST`, `DEVCASCADE_API_PORT`, `DEVCASCADE_API_TOKEN`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("DEVCASCADE_API_HOST").filter(|h| !h.trim().is_empty()) {
            self.api.host = host.trim().to_string();
        }
        if let Some(port) = lookup("DEVCASCADE_API_PORT") {
            match port.trim().parse() {
                Ok(p) => self.api.port = p,
                Err(_) => warn!("Ignoring DEVCASCADE_API_PORT={:?}: not a port", port),
            }
        }
        if let Some(token) = lookup("DEVCASCADE_API_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.api.api_token = Some(token.trim().to_string());
        }
    }

    fn validate(&self) -> Result<()> {
        if self.engine.max_plan_steps == 0 {
            anyhow::bail!("engine.max_plan_steps must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        Ok(())
    }
}
