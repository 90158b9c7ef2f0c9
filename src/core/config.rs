use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Immutable configuration for one orchestrator run. Built once at the
/// entry point and passed down; nothing here is mutated after load.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunConfig {
    #[serde(default)]
    pub run: BatchConfig,

    #[serde(default)]
    pub preview: PreviewConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Concurrent agent calls. Scale together with `connection_pool_size`;
    /// workers beyond pool capacity only queue.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_pool_size")]
    pub connection_pool_size: usize,

    /// Per-call agent timeout in seconds. A stuck call degrades to a
    /// failed outcome for that job only.
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub recipient: String,

    #[serde(default = "default_preview_max_jobs")]
    pub max_jobs: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Full URL of the analysis-agent run endpoint.
    #[serde(default)]
    pub base_url: String,

    /// Environment variable holding the bearer credential. Read once per
    /// run when the client is constructed, never per call.
    #[serde(default = "default_credential_env")]
    pub credential_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default = "default_smtp_password_env")]
    pub password_env: String,

    /// Sender address. Falls back to `username` when empty.
    #[serde(default)]
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReportConfig {
    /// Recipients of the administrative run summary.
    #[serde(default)]
    pub admin_recipients: Vec<String>,
}

fn default_worker_count() -> usize {
    4
}
fn default_pool_size() -> usize {
    4
}
fn default_agent_timeout() -> u64 {
    50
}
fn default_preview_max_jobs() -> usize {
    10
}
fn default_credential_env() -> String {
    "VIGIL_AGENT_TOKEN".to_string()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_smtp_password_env() -> String {
    "VIGIL_SMTP_PASSWORD".to_string()
}
fn default_db_path() -> String {
    "vigil.db".to_string()
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            connection_pool_size: default_pool_size(),
            agent_timeout_secs: default_agent_timeout(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            recipient: String::new(),
            max_jobs: default_preview_max_jobs(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            credential_env: default_credential_env(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            username: String::new(),
            password_env: default_smtp_password_env(),
            from: String::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl RunConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file at {}, using defaults.", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: RunConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: RunConfig = toml::from_str("").unwrap();
        assert_eq!(config.run.worker_count, 4);
        assert_eq!(config.run.agent_timeout_secs, 50);
        assert!(!config.preview.enabled);
        assert_eq!(config.preview.max_jobs, 10);
        assert_eq!(config.smtp.port, 587);
        assert!(config.report.admin_recipients.is_empty());
    }

    #[test]
    fn partial_sections_keep_field_defaults() {
        let content = r#"
[run]
worker_count = 8

[preview]
enabled = true
recipient = "ops@example.com"

[report]
admin_recipients = ["admin@example.com", "oncall@example.com"]
"#;
        let config: RunConfig = toml::from_str(content).unwrap();
        assert_eq!(config.run.worker_count, 8);
        assert_eq!(config.run.connection_pool_size, 4);
        assert!(config.preview.enabled);
        assert_eq!(config.preview.recipient, "ops@example.com");
        assert_eq!(config.preview.max_jobs, 10);
        assert_eq!(config.report.admin_recipients.len(), 2);
    }
}
