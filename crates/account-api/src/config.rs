// Service configuration
// Decision: Environment variables (optionally from a .env file) with defaults for local runs

use std::path::PathBuf;
use std::str::FromStr;

use account_runtime::{RuntimeConfig, ServiceTimeouts};
use anyhow::{bail, Context, Result};

/// Journal backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Durable RocksDB journal under `journal_dir`
    RocksDb,
    /// In-process journal, lost on exit
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RocksDb => "rocksdb",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rocksdb" => Ok(Self::RocksDb),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown storage backend '{}', expected 'rocksdb' or 'memory'", other),
        }
    }
}

/// Configuration of the whole service
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Prefix for the API routes, e.g. "/api" (health stays unprefixed)
    pub api_prefix: String,
    pub storage: StorageBackend,
    pub journal_dir: PathBuf,
    pub cors_allowed_origins: Vec<String>,
    /// Stop the server when ENTER is pressed on stdin
    pub stop_on_enter: bool,
    pub runtime: RuntimeConfig,
    pub timeouts: ServiceTimeouts,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_prefix: String::new(),
            storage: StorageBackend::RocksDb,
            journal_dir: PathBuf::from("./data/journal"),
            cors_allowed_origins: Vec::new(),
            stop_on_enter: true,
            runtime: RuntimeConfig::default(),
            timeouts: ServiceTimeouts::default(),
        }
    }
}

impl AppConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match std::env::var("SERVER_PORT") {
            Ok(port) => port
                .parse()
                .with_context(|| format!("SERVER_PORT is not a valid port: {}", port))?,
            Err(_) => defaults.port,
        };

        let storage = match std::env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.storage,
        };

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let stop_on_enter = std::env::var("STOP_ON_ENTER")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(defaults.stop_on_enter);

        Ok(Self {
            host: std::env::var("SERVER_HOST").unwrap_or(defaults.host),
            port,
            api_prefix: std::env::var("API_PREFIX").unwrap_or_default(),
            storage,
            journal_dir: std::env::var("JOURNAL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.journal_dir),
            cors_allowed_origins,
            stop_on_enter,
            runtime: RuntimeConfig::from_env(),
            timeouts: ServiceTimeouts::from_env(),
        })
    }

    /// Address to bind the HTTP listener to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
