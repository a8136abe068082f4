use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One `[[database]]` record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Unique backend name that queries are routed by.
    pub id: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name.
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Require an encrypted session.
    #[serde(default)]
    pub ssl: bool,
    /// Optional CA certificate (PEM). When set together with `ssl`, the server
    /// certificate is verified against it.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
}

fn default_port() -> u16 {
    5432
}

impl DatabaseConfig {
    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.hostname, self.port, self.name
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSettings {
    /// Handshake timeout handed to the driver.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Deliver `ConnectionLost` to owners of requests abandoned when a
    /// connection fails or the configuration is reloaded.
    #[serde(default)]
    pub notify_abandoned: bool,
}

fn default_connect_timeout() -> u64 {
    2
}

impl ProviderSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            notify_abandoned: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    pub settings: ProviderSettings,
    #[serde(default, rename = "database")]
    pub databases: Vec<DatabaseConfig>,
}

impl ProviderConfig {
    pub fn get_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pgqueue")
            .join("databases.toml")
    }

    /// Load from the default location. A missing file is an empty config.
    pub fn load() -> Result<Self> {
        let path = Self::get_config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ProviderConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Ids declared more than once. Only the first record of each is used.
    pub fn duplicate_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.databases
            .iter()
            .filter(|db| !seen.insert(db.id.as_str()))
            .map(|db| db.id.as_str())
            .collect()
    }
}
