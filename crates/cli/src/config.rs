//! Configuration loading and validation.
//!
//! Loads `<systemDir>/config.toml` with environment-variable overrides.
//! Missing files fall back to defaults so a bare `steward` invocation works.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use steward_agent::system_dir;

#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Store backend: "memory" or "sqlite".
    #[serde(default = "default_database")]
    pub database: String,

    /// "single_user" or "multi_user".
    #[serde(default = "default_auth")]
    pub auth: String,

    /// SQLite database file; defaults to `<systemDir>/steward.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<String>,

    /// Default human-in-the-loop gates for new agents.
    #[serde(default)]
    pub hil: HilConfig,

    #[serde(default)]
    pub gitlab: GitLabConfig,
}

fn default_database() -> String {
    "memory".into()
}

fn default_auth() -> String {
    "single_user".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HilConfig {
    /// USD an agent may spend between gates; 0 disables the cost gate.
    #[serde(default = "default_hil_budget")]
    pub budget: f64,

    /// Planning iterations between gates; 0 disables the iteration gate.
    #[serde(default = "default_hil_count")]
    pub count: u32,
}

fn default_hil_budget() -> f64 {
    1.0
}

fn default_hil_count() -> u32 {
    5
}

impl Default for HilConfig {
    fn default() -> Self {
        Self {
            budget: default_hil_budget(),
            count: default_hil_count(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct GitLabConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default)]
    pub groups: Vec<String>,
}

fn redact(value: &Option<String>) -> &'static str {
    match value {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database", &self.database)
            .field("auth", &self.auth)
            .field("sqlite_path", &self.sqlite_path)
            .field("hil", &self.hil)
            .field("gitlab", &self.gitlab)
            .finish()
    }
}

impl std::fmt::Debug for GitLabConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabConfig")
            .field("host", &self.host)
            .field("token", &redact(&self.token))
            .field("groups", &self.groups)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            auth: default_auth(),
            sqlite_path: None,
            hil: HilConfig::default(),
            gitlab: GitLabConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `<systemDir>/config.toml`, then apply env overrides
    /// (`DATABASE`, `AUTH`, `GITLAB_HOST`, `GITLAB_TOKEN`, `GITLAB_GROUPS`).
    pub fn load() -> Result<Self, ConfigError> {
        let path = system_dir().join("config.toml");
        let mut config = Self::load_from(&path)?;

        if let Ok(database) = std::env::var("DATABASE") {
            config.database = database;
        }
        if let Ok(auth) = std::env::var("AUTH") {
            config.auth = auth;
        }
        if let Ok(host) = std::env::var("GITLAB_HOST") {
            config.gitlab.host = Some(host);
        }
        if let Ok(token) = std::env::var("GITLAB_TOKEN") {
            config.gitlab.token = Some(token);
        }
        if let Ok(groups) = std::env::var("GITLAB_GROUPS") {
            config.gitlab.groups = groups.split(',').map(|s| s.trim().to_string()).collect();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| system_dir().join("steward.db"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.database.as_str(), "memory" | "sqlite") {
            return Err(ConfigError::Validation(format!(
                "database must be 'memory' or 'sqlite', got '{}'",
                self.database
            )));
        }
        if !matches!(self.auth.as_str(), "single_user" | "multi_user") {
            return Err(ConfigError::Validation(format!(
                "auth must be 'single_user' or 'multi_user', got '{}'",
                self.auth
            )));
        }
        if self.hil.budget < 0.0 {
            return Err(ConfigError::Validation(
                "hil.budget must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}
