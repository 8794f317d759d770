use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub summary: SummaryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
    /// How long a writer waits for the SQLite write lock before giving up.
    pub busy_timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub max_chars: usize,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://bookswap.db".to_string(),
            max_connections: Some(10),
            busy_timeout_seconds: Some(5),
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.grok.ai/v1/completions".to_string(),
            api_key: None,
            timeout_seconds: 5,
            max_chars: 240,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Some("plain".to_string()),
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_seconds.unwrap_or(5))
    }
}

impl SummaryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.as_deref() == Some("json")
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| MarketError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&config_str)
            .map_err(|e| MarketError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies `DATABASE_URL`, `BOOKSWAP_JWT_SECRET`, `SUMMARY_API_KEY` and `RUST_LOG`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }

        if let Some(secret) = lookup("BOOKSWAP_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }

        if let Some(key) = lookup("SUMMARY_API_KEY") {
            self.summary.api_key = Some(key);
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(MarketError::Config("Server port cannot be 0".to_string()));
        }

        if self.database.url.is_empty() {
            return Err(MarketError::Config("Database URL cannot be empty".to_string()));
        }

        if self.database.max_connections == Some(0) {
            return Err(MarketError::Config("Database pool needs at least one connection".to_string()));
        }

        if self.database.busy_timeout_seconds == Some(0) {
            return Err(MarketError::Config("Database busy timeout cannot be 0".to_string()));
        }

        if self.summary.timeout_seconds == 0 {
            return Err(MarketError::Config("Summary timeout cannot be 0".to_string()));
        }

        match self.auth.jwt_secret.as_deref() {
            Some(secret) if !secret.trim().is_empty() => Ok(()),
            _ => Err(MarketError::Config("JWT secret must be set".to_string())),
        }
    }

    pub fn get_database_url(&self) -> &str {
        &self.database.url
    }

    pub fn get_server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn get_jwt_secret(&self) -> Option<&str> {
        self.auth.jwt_secret.as_deref()
    }

    pub fn is_summary_configured(&self) -> bool {
        self.summary.api_key.is_some()
    }
}

pub fn create_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let default_config = AppConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| MarketError::Config(format!("Failed to serialize default config: {}", e)))?;

    std::fs::write(path, toml_str)
        .map_err(|e| MarketError::Config(format!("Failed to write default config file: {}", e)))?;

    Ok(())
}
