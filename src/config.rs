//! Environment-driven configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::error::EngineError;
use crate::persistence::DEFAULT_STORAGE_PREFIX;
use crate::Result;

pub const DEFAULT_RUN_ID_URL: &str = "http://127.0.0.1:8080/api/run-id";
pub const DEFAULT_STORE_DIR: &str = ".loan_session";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_RUN_ID_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub run_id_url: String,
    pub store_dir: PathBuf,
    pub storage_prefix: String,
    pub port: u16,
    pub run_id_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_id_url: DEFAULT_RUN_ID_URL.to_string(),
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            port: DEFAULT_PORT,
            run_id_timeout: Duration::from_secs(DEFAULT_RUN_ID_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    /// Read from the process environment. Call `dotenv::dotenv()` first to
    /// pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` against any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| EngineError::ConfigError(format!("invalid PORT {:?}: {}", raw, e)))?,
            None => defaults.port,
        };

        let run_id_timeout = match get("RUN_ID_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|e| {
                EngineError::ConfigError(format!("invalid RUN_ID_TIMEOUT_SECS {:?}: {}", raw, e))
            })?),
            None => defaults.run_id_timeout,
        };

        Ok(Self {
            run_id_url: get("RUN_ID_URL").unwrap_or(defaults.run_id_url),
            store_dir: get("CONTEXT_STORE_DIR").map(PathBuf::from).unwrap_or(defaults.store_dir),
            storage_prefix: lookup("STORAGE_PREFIX").unwrap_or(defaults.storage_prefix),
            port,
            run_id_timeout,
        })
    }
}
