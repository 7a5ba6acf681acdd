//! Configuration loader and validator for the community manager.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub backend: Backend,
    pub keycloak: Keycloak,
    pub email: Email,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub summary_interval_seconds: u64,
    /// Daily request quota for users without a premium or admin role.
    pub max_requests_for_user: u32,
}

/// Dataland backend API (company directory and dataset metadata).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub base_url: String,
    pub token: String,
}

/// Keycloak admin API used as the user directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Keycloak {
    pub base_url: String,
    pub realm: String,
    pub token: String,
}

/// Email service that renders and delivers messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Email {
    pub base_url: String,
    pub token: String,
    /// Receivers of internal notifications such as bulk request summaries.
    #[serde(default)]
    pub internal_recipients: Vec<String>,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// SQLite URL, overridable through `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/community.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.summary_interval_seconds == 0 {
        return Err(ConfigError::Invalid("app.summary_interval_seconds must be > 0"));
    }
    if cfg.app.max_requests_for_user == 0 {
        return Err(ConfigError::Invalid("app.max_requests_for_user must be > 0"));
    }

    if cfg.backend.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.base_url must be non-empty"));
    }
    if cfg.backend.token.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.token must be non-empty"));
    }

    if cfg.keycloak.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("keycloak.base_url must be non-empty"));
    }
    if cfg.keycloak.realm.trim().is_empty() {
        return Err(ConfigError::Invalid("keycloak.realm must be non-empty"));
    }
    if cfg.keycloak.token.trim().is_empty() {
        return Err(ConfigError::Invalid("keycloak.token must be non-empty"));
    }

    if cfg.email.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("email.base_url must be non-empty"));
    }
    if cfg.email.token.trim().is_empty() {
        return Err(ConfigError::Invalid("email.token must be non-empty"));
    }
    if cfg.email.internal_recipients.iter().any(|r| r.trim().is_empty()) {
        return Err(ConfigError::Invalid("email.internal_recipients must not contain blanks"));
    }

    Ok(())
}

/// Example configuration with every supported key.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  summary_interval_seconds: 3600
  max_requests_for_user: 10

backend:
  base_url: "http://localhost:8080/api/"
  token: "BACKEND_API_TOKEN"

keycloak:
  base_url: "http://localhost:8080/keycloak/"
  realm: "datalandsecurity"
  token: "KEYCLOAK_ADMIN_TOKEN"

email:
  base_url: "http://localhost:8080/email/"
  token: "EMAIL_SERVICE_TOKEN"
  internal_recipients:
    - "requests@dataland.invalid"
"#
}
