//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which selects the backend environment, optional base-URL overrides, and
//! where session secrets are kept.
//!
//! Configuration is stored at `~/.config/googs/config.json`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "googs";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Directory under the data dir holding encrypted session files
const SESSION_DIR: &str = "session";

pub const LOCAL_BASE_URL: &str = "http://localhost:8000";
pub const PRODUCTION_BASE_URL: &str = "https://your-vps-domain.com/api";

/// Overrides the configured environment (`local` or `production`).
pub const ENV_ENVIRONMENT: &str = "GOOGS_ENV";
/// Overrides the base URL of the active environment.
pub const ENV_BASE_URL: &str = "GOOGS_BASE_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Environment {
    #[default]
    Local,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Local, Environment::Production];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Environment::Local => "Local Development",
            Environment::Production => "Production",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Environment::Local => LOCAL_BASE_URL,
            Environment::Production => PRODUCTION_BASE_URL,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "dev" | "development" => Ok(Environment::Local),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(anyhow::anyhow!(
                "Unknown environment '{}' (expected 'local' or 'production')",
                other
            )),
        }
    }
}

/// The backend endpoint set a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentTarget {
    pub environment: Environment,
    pub base_url: String,
}

impl EnvironmentTarget {
    pub fn new(environment: Environment, base_url: impl Into<String>) -> Self {
        Self {
            environment,
            base_url: base_url.into(),
        }
    }
}

impl From<Environment> for EnvironmentTarget {
    fn from(environment: Environment) -> Self {
        Self::new(environment, environment.default_base_url())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Keychain,
    EncryptedFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    pub local_base_url: Option<String>,
    pub production_base_url: Option<String>,
    pub store: StoreKind,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Where the encrypted-file backend keeps session secrets.
    pub fn session_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(SESSION_DIR))
    }

    pub fn base_url(&self, environment: Environment) -> String {
        let custom = match environment {
            Environment::Local => self.local_base_url.as_deref(),
            Environment::Production => self.production_base_url.as_deref(),
        };
        custom
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(environment.default_base_url())
            .to_string()
    }

    pub fn target(&self) -> EnvironmentTarget {
        self.target_for(self.environment)
    }

    pub fn target_for(&self, environment: Environment) -> EnvironmentTarget {
        EnvironmentTarget::new(environment, self.base_url(environment))
    }

    /// Apply `GOOGS_ENV` / `GOOGS_BASE_URL` from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(ENV_ENVIRONMENT) {
            self.environment = value
                .parse()
                .with_context(|| format!("Invalid {}", ENV_ENVIRONMENT))?;
        }
        if let Some(url) = lookup(ENV_BASE_URL).filter(|u| !u.trim().is_empty()) {
            match self.environment {
                Environment::Local => self.local_base_url = Some(url),
                Environment::Production => self.production_base_url = Some(url),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.environment, Environment::Local);
        assert_eq!(config.store, StoreKind::Keychain);
        assert_eq!(config.target(), EnvironmentTarget::new(Environment::Local, LOCAL_BASE_URL));
        assert_eq!(config.base_url(Environment::Production), PRODUCTION_BASE_URL);
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("local".parse::<Environment>().unwrap(), Environment::Local);
        assert_eq!("Prod".parse::<Environment>().unwrap(), Environment::Production);
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::Production.to_string(), "production");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        assert_eq!(Config::load_from(&path).unwrap(), Config::default());

        let config = Config {
            environment: Environment::Production,
            production_base_url: Some("https://mail.example.com/api".to_string()),
            store: StoreKind::EncryptedFile,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
        assert_eq!(config.target().base_url, "https://mail.example.com/api");
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"environment": "production"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.store, StoreKind::Keychain);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_ENVIRONMENT, "production"),
            (ENV_BASE_URL, "https://staging.example.com"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.target().base_url, "https://staging.example.com");
        assert_eq!(config.base_url(Environment::Local), LOCAL_BASE_URL);

        let mut config = Config::default();
        let err = config.apply_overrides_from(|name| (name == ENV_ENVIRONMENT).then(|| "mars".to_string()));
        assert!(err.is_err());
    }
}
