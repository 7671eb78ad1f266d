use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::ledger::MemoryAccount;
use crate::network::DirectoryEntry;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Partner network endpoint; the static sandbox directory is used when absent
    #[serde(default)]
    pub bank_network_url: Option<String>,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Engine policy knobs
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Institution code treated as "internal" when given as routing info
    pub home_institution_code: String,
    pub home_institution_name: String,
    /// Minor-unit decimals of the account currency
    pub currency_decimals: u32,
    pub min_account_number_len: usize,
    pub max_pin_attempts: u8,
    pub resolution_timeout_ms: u64,
    pub resolution_max_attempts: u32,
    pub resolution_backoff_ms: u64,
    pub ledger_timeout_ms: u64,
    pub idempotency_retention_secs: u64,
    pub atm_code_validity_secs: u64,
    pub atm_code_digits: u32,
    /// Abandoned transfer flows are dropped after this long
    pub flow_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            home_institution_code: "000".to_string(),
            home_institution_name: "Home Bank".to_string(),
            currency_decimals: 2,
            min_account_number_len: 10,
            max_pin_attempts: 3,
            resolution_timeout_ms: 15_000,
            resolution_max_attempts: 3,
            resolution_backoff_ms: 200,
            ledger_timeout_ms: 15_000,
            idempotency_retention_secs: 24 * 60 * 60,
            atm_code_validity_secs: 900,
            atm_code_digits: 6,
            flow_ttl_secs: 30 * 60,
        }
    }
}

impl EngineConfig {
    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.resolution_timeout_ms)
    }

    pub fn resolution_backoff(&self) -> Duration {
        Duration::from_millis(self.resolution_backoff_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    pub fn idempotency_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idempotency_retention_secs as i64)
    }

    pub fn atm_code_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.atm_code_validity_secs as i64)
    }

    pub fn flow_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.flow_ttl_secs as i64)
    }
}

/// Maintenance worker schedule
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub scan_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

/// Seed data for the in-memory ledger and partner directory
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SandboxConfig {
    #[serde(default)]
    pub accounts: Vec<MemoryAccount>,
    #[serde(default)]
    pub directory: Vec<DirectoryEntry>,
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: config_path,
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}
