//! Configuration for the ticket sync service
//!
//! Loaded from a TOML file, then overridden by `TICKET_SYNC_*` environment
//! variables. [`Config::validate`] must pass before reconciliation starts.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use ticket_ledger::{Address, StorageConfig};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    Pretty,
    /// One JSON object per line
    Json,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Log output format
    pub log_format: LogFormat,

    /// Ledger storage
    pub storage: StorageConfig,

    /// Chain event provider
    pub provider: ProviderConfig,

    /// Reconciliation schedule and bounds
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "ticket-sync".to_string(),
            log_format: LogFormat::Pretty,
            storage: StorageConfig::default(),
            provider: ProviderConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// Chain provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// JSON-RPC endpoint (e.g. an Infura project URL)
    pub endpoint: String,

    /// Ticket contract whose logs are reconciled
    pub contract_address: String,

    /// Per-request timeout (milliseconds)
    pub request_timeout_ms: u64,

    /// Largest block span requested in one `eth_getLogs`
    pub max_block_range: u64,

    /// Sub-range requests in flight at once
    pub max_parallel_requests: usize,

    /// Attempts per request before the provider is declared unavailable
    pub max_retry_attempts: u32,

    /// Initial retry delay (milliseconds)
    pub initial_retry_delay_ms: u64,

    /// Max retry delay (milliseconds)
    pub max_retry_delay_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8545".to_string(),
            contract_address: String::new(),
            request_timeout_ms: 30_000,
            max_block_range: 2_000, // Common gateway cap for eth_getLogs
            max_parallel_requests: 4,
            max_retry_attempts: 5,
            initial_retry_delay_ms: 200,
            max_retry_delay_ms: 10_000,
        }
    }
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Cursor value on first run; events at or below it are never fetched
    pub start_block: u64,

    /// Blocks behind head treated as final
    pub confirmation_depth: u64,

    /// Interval between sync passes (milliseconds)
    pub poll_interval_ms: u64,

    /// Blocks applied before the cursor is advanced
    pub batch_blocks: u64,

    /// Re-read-and-retry attempts after a store conflict
    pub conflict_retries: u32,

    /// Deadline for one sync pass (milliseconds)
    pub sync_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            confirmation_depth: 12,
            poll_interval_ms: 15_000,
            batch_blocks: 5_000,
            conflict_retries: 3,
            sync_timeout_ms: 120_000,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} is not valid: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `TICKET_SYNC_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(data_dir) = std::env::var("TICKET_SYNC_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(endpoint) = std::env::var("TICKET_SYNC_PROVIDER_URL") {
            self.provider.endpoint = endpoint;
        }

        if let Ok(contract) = std::env::var("TICKET_SYNC_CONTRACT") {
            self.provider.contract_address = contract;
        }

        if let Some(start_block) = env_parse("TICKET_SYNC_START_BLOCK")? {
            self.sync.start_block = start_block;
        }

        if let Some(depth) = env_parse("TICKET_SYNC_CONFIRMATIONS")? {
            self.sync.confirmation_depth = depth;
        }

        if let Some(interval) = env_parse("TICKET_SYNC_POLL_INTERVAL_MS")? {
            self.sync.poll_interval_ms = interval;
        }

        Ok(())
    }

    /// Parsed contract address
    pub fn contract_address(&self) -> Result<Address> {
        self.provider
            .contract_address
            .parse()
            .map_err(|e| Error::Config(format!("provider.contract_address: {}", e)))
    }

    /// Reject configurations reconciliation cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.provider.endpoint.trim().is_empty() {
            return Err(Error::Config("provider.endpoint is empty".to_string()));
        }

        let contract = self.contract_address()?;
        if contract.is_zero() {
            return Err(Error::Config(
                "provider.contract_address is the zero address".to_string(),
            ));
        }

        if self.provider.max_block_range == 0 {
            return Err(Error::Config("provider.max_block_range must be > 0".to_string()));
        }

        if self.provider.max_parallel_requests == 0 {
            return Err(Error::Config(
                "provider.max_parallel_requests must be > 0".to_string(),
            ));
        }

        if self.provider.initial_retry_delay_ms > self.provider.max_retry_delay_ms {
            return Err(Error::Config(
                "provider.initial_retry_delay_ms exceeds max_retry_delay_ms".to_string(),
            ));
        }

        if self.sync.batch_blocks == 0 {
            return Err(Error::Config("sync.batch_blocks must be > 0".to_string()));
        }

        if self.sync.poll_interval_ms == 0 {
            return Err(Error::Config("sync.poll_interval_ms must be > 0".to_string()));
        }

        if self.sync.sync_timeout_ms == 0 {
            return Err(Error::Config("sync.sync_timeout_ms must be > 0".to_string()));
        }

        Ok(())
    }
}
