//! Application configuration.
//!
//! Read from `$GNBWATCH_CONFIG` or `./gnbwatch.toml` when present, then
//! overlaid by the environment. The three endpoint settings are required.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use gnbwatch_broker_connection::{Backoff, RetryPolicy};
use gnbwatch_protocol::constants::{CONNECT_RETRY_INTERVAL, DEFAULT_OUTPUT_DIR, STOMP_HEARTBEAT};
use gnbwatch_telemetry::Alignment;

const CONFIG_ENV: &str = "GNBWATCH_CONFIG";
const CONFIG_FILE: &str = "gnbwatch.toml";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Keycloak base URL.
    #[serde(default, alias = "ACCESS_TOKEN_URL")]
    pub access_token_url: Option<String>,

    /// Tenant directory endpoint.
    #[serde(default, alias = "TENANT_API_URL")]
    pub tenant_api_url: Option<String>,

    /// STOMP WebSocket endpoint.
    #[serde(default, alias = "BROKER_URL")]
    pub broker_url: Option<String>,

    /// Directory receiving CSV exports. Never created.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Credential prompts before giving up.
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,

    /// UE column grouping in the export.
    #[serde(default)]
    pub alignment: Alignment,

    #[serde(default = "default_render_interval_ms")]
    pub render_interval_ms: u64,

    /// Heart-beat offered to the broker; 0 disables.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

/// Backoff growth between broker connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Broker connection retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_interval_ms")]
    pub interval_ms: u64,

    /// 0 retries until interrupted.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: BackoffKind,

    /// Cap for exponential backoff.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_max_login_attempts() -> u32 {
    5
}

fn default_render_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_ms() -> u64 {
    STOMP_HEARTBEAT.as_millis() as u64
}

fn default_retry_interval_ms() -> u64 {
    CONNECT_RETRY_INTERVAL.as_millis() as u64
}

fn default_max_attempts() -> u32 {
    gnbwatch_broker_connection::types::DEFAULT_MAX_CONNECT_ATTEMPTS
}

fn default_max_interval_ms() -> u64 {
    15_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_retry_interval_ms(),
            max_attempts: default_max_attempts(),
            backoff: BackoffKind::Fixed,
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let interval = Duration::from_millis(self.interval_ms);
        RetryPolicy {
            interval,
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            backoff: match self.backoff {
                BackoffKind::Fixed => Backoff::Fixed,
                BackoffKind::Exponential => Backoff::Exponential {
                    factor: 2.0,
                    max: Duration::from_millis(self.max_interval_ms).max(interval),
                },
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            access_token_url: None,
            tenant_api_url: None,
            broker_url: None,
            output_dir: default_output_dir(),
            retry: RetryConfig::default(),
            max_login_attempts: default_max_login_attempts(),
            alignment: Alignment::default(),
            render_interval_ms: default_render_interval_ms(),
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

/// The three required endpoints, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub access_token_url: String,
    pub tenant_api_url: String,
    pub broker_url: String,
}

impl AppConfig {
    /// Loads the config file (if any) and applies the environment.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            tracing::debug!(path = %path.display(), "configuration file loaded");
            config
        } else {
            AppConfig::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overrides endpoints with environment values; lower-case names win
    /// over upper-case ones.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| {
            lookup(name)
                .or_else(|| lookup(&name.to_ascii_uppercase()))
                .filter(|v| !v.trim().is_empty())
        };
        if let Some(v) = get("access_token_url") {
            self.access_token_url = Some(v);
        }
        if let Some(v) = get("tenant_api_url") {
            self.tenant_api_url = Some(v);
        }
        if let Some(v) = get("broker_url") {
            self.broker_url = Some(v);
        }
    }

    /// Fails naming the first missing endpoint.
    pub fn endpoints(&self) -> anyhow::Result<Endpoints> {
        fn required(value: &Option<String>, name: &str) -> anyhow::Result<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .with_context(|| {
                    format!("missing required setting `{name}` (environment or {CONFIG_FILE})")
                })
        }
        Ok(Endpoints {
            access_token_url: required(&self.access_token_url, "access_token_url")?,
            tenant_api_url: required(&self.tenant_api_url, "tenant_api_url")?,
            broker_url: required(&self.broker_url, "broker_url")?,
        })
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms.max(50))
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}
