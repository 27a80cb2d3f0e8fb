use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::pipeline::FetchSettings;
use crate::report::{present, PolicyUpdateMode};
use crate::types::Credentials;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub newrelic: NewRelicConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRelicConfig {
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
    #[serde(default = "default_console_url")]
    pub console_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub account_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    #[serde(default = "default_audit_timeout_secs")]
    pub audit_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default)]
    pub policy_last_update: PolicyUpdateMode,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_alerts_file")]
    pub alerts_file: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub graphql_url: Option<String>,
    pub api_key: Option<String>,
    pub account_id: Option<i64>,
    pub output_dir: Option<String>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/alert-audit/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.graphql_url {
            self.newrelic.graphql_url = url;
        }
        if let Some(api_key) = overrides.api_key {
            self.newrelic.api_key = Some(api_key);
        }
        if let Some(account_id) = overrides.account_id {
            self.newrelic.account_id = Some(account_id);
        }
        if let Some(output_dir) = overrides.output_dir {
            self.report.output_dir = output_dir;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            page_timeout: Duration::from_secs(self.fetch.page_timeout_secs.max(1)),
            audit_timeout: Duration::from_secs(self.fetch.audit_timeout_secs.max(1)),
            max_pages: self.fetch.max_pages.max(1),
            console_url: self.newrelic.console_url.clone(),
            policy_update_mode: self.report.policy_last_update,
        }
    }

    /// Flag or environment values win; blank ones fall back to the file.
    pub fn credentials(
        &self,
        api_key: Option<&str>,
        account_id: Option<&str>,
    ) -> Result<Credentials, AuditError> {
        let file_account = self.newrelic.account_id.map(|id| id.to_string());
        let api_key = present(api_key).or(self.newrelic.api_key.as_deref());
        let account_id = present(account_id).or(file_account.as_deref());
        Credentials::from_parts(api_key, account_id)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.connect_timeout_secs.max(1))
    }

    pub fn resolved_output_dir(&self) -> PathBuf {
        expand_tilde(&self.report.output_dir)
    }

    pub fn default_template() -> String {
        let template = r#"[newrelic]
graphql_url = "https://api.newrelic.com/graphql"
console_url = "https://one.newrelic.com"
# Prefer NEW_RELIC_API_KEY / NEW_RELIC_ACCOUNT_ID in the environment.
# api_key = "NRAK-..."
# account_id = 1234567

[fetch]
page_timeout_secs = 15
audit_timeout_secs = 30
connect_timeout_secs = 6
max_pages = 1000

[report]
lookback_days = 30
# "policy_max": latest update across all of the policy's conditions
# "condition": the condition's own update time
policy_last_update = "policy_max"
output_dir = "."
alerts_file = "new_relic_alerts.csv"
audit_file = "nr_audit_event.csv"

[server]
host = "127.0.0.1"
port = 5000
job_ttl_secs = 3600
max_jobs = 256
sweep_interval_secs = 60
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for NewRelicConfig {
    fn default() -> Self {
        Self {
            graphql_url: default_graphql_url(),
            console_url: default_console_url(),
            api_key: None,
            account_id: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_timeout_secs: default_page_timeout_secs(),
            audit_timeout_secs: default_audit_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_pages: default_max_pages(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            policy_last_update: PolicyUpdateMode::default(),
            output_dir: default_output_dir(),
            alerts_file: default_alerts_file(),
            audit_file: default_audit_file(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            job_ttl_secs: default_job_ttl_secs(),
            max_jobs: default_max_jobs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_graphql_url() -> String {
    "https://api.newrelic.com/graphql".to_string()
}

fn default_console_url() -> String {
    "https://one.newrelic.com".to_string()
}

fn default_page_timeout_secs() -> u64 {
    15
}

fn default_audit_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    6
}

fn default_max_pages() -> usize {
    1000
}

fn default_lookback_days() -> u32 {
    30
}

fn default_output_dir() -> String {
    ".".to_string()
}

fn default_alerts_file() -> String {
    "new_relic_alerts.csv".to_string()
}

fn default_audit_file() -> String {
    "nr_audit_event.csv".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_job_ttl_secs() -> u64 {
    3600
}

fn default_max_jobs() -> usize {
    256
}

fn default_sweep_interval_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let parsed: Config = toml::from_str(&Config::default_template()).expect("valid TOML");
        assert_eq!(parsed.fetch.page_timeout_secs, 15);
        assert_eq!(parsed.fetch.audit_timeout_secs, 30);
        assert_eq!(parsed.report.policy_last_update, PolicyUpdateMode::PolicyMax);
        assert_eq!(parsed.server.port, 5000);
        assert!(parsed.newrelic.api_key.is_none());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[report]
policy_last_update = "condition"
"#,
        )
        .expect("valid TOML");
        assert_eq!(parsed.report.policy_last_update, PolicyUpdateMode::Condition);
        assert_eq!(parsed.report.lookback_days, 30);
        assert_eq!(parsed.newrelic.graphql_url, "https://api.newrelic.com/graphql");
    }

    #[test]
    fn overrides_and_settings() {
        let mut config = Config::default();
        config.apply_overrides(ConfigOverrides {
            account_id: Some(77),
            api_key: Some("key".to_string()),
            ..ConfigOverrides::default()
        });
        assert_eq!(config.newrelic.account_id, Some(77));
        let settings = config.fetch_settings();
        assert_eq!(settings.page_timeout, Duration::from_secs(15));
        assert_eq!(settings.audit_timeout, Duration::from_secs(30));
        assert_eq!(settings.max_pages, 1000);
    }

    #[test]
    fn api_key_is_never_serialized() {
        let mut config = Config::default();
        config.newrelic.api_key = Some("NRAK-secret".to_string());
        let rendered = serde_json::to_string(&config).expect("serializable");
        assert!(!rendered.contains("NRAK-secret"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/alert-audit.toml")))
            .expect("defaults");
        assert_eq!(config.server.max_jobs, 256);
    }

    #[test]
    fn blank_flag_values_fall_back_to_file_credentials() {
        let mut config = Config::default();
        config.newrelic.api_key = Some("NRAK-file".to_string());
        config.newrelic.account_id = Some(31);

        let creds = config.credentials(Some(""), Some("  ")).expect("file values");
        assert_eq!(creds.api_key, "NRAK-file");
        assert_eq!(creds.account_id, 31);

        let creds = config.credentials(Some("NRAK-flag"), Some("7")).expect("flag values");
        assert_eq!(creds.api_key, "NRAK-flag");
        assert_eq!(creds.account_id, 7);

        assert!(matches!(
            Config::default().credentials(Some(""), Some("7")),
            Err(AuditError::MissingCredentials(_))
        ));
    }
}
