//! Runtime configuration.
//!
//! Loaded from a TOML file with per-field defaults, then overridden by
//! environment variables for the values that are deployment secrets. Every
//! option is validated before any component starts.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment variable names recognised at load time.
mod env {
    /// Path to the TOML configuration file.
    pub const CONFIG_PATH: &str = "RELAYER_CONFIG";
    pub const RPC_URL: &str = "RELAYER_RPC_URL";
    pub const CHAIN_ID: &str = "RELAYER_CHAIN_ID";
    pub const KMS_KEY: &str = "RELAYER_KMS_KEY";
    pub const STORE_PATH: &str = "RELAYER_STORE_PATH";
}

/// Top-level relayer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayerConfig {
    #[serde(default)]
    pub chain: ChainSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub builder: BuilderSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
}

/// Chain RPC settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    /// HTTP JSON-RPC endpoint. Required.
    #[serde(default)]
    pub rpc_url: String,

    /// Chain id all transactions are signed for.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Percentage applied to the node-suggested gas price (110 = +10%).
    #[serde(default = "default_gas_price_multiplier")]
    pub gas_price_multiplier: u64,

    /// Per-call RPC deadline in seconds.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

fn default_chain_id() -> u64 {
    137
}
fn default_gas_price_multiplier() -> u64 {
    110
}
fn default_rpc_timeout_secs() -> u64 {
    10
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            chain_id: default_chain_id(),
            gas_price_multiplier: default_gas_price_multiplier(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

impl ChainSettings {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

/// Key custody backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KmsBackend {
    #[default]
    Local,
    AwsKms,
    Vault,
}

/// Key custody settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecuritySettings {
    #[serde(default)]
    pub kms_type: KmsBackend,

    /// Backend-specific configuration. For `local`: the base64-encoded
    /// 32-byte AES key. Usually injected via environment.
    #[serde(default)]
    pub kms_config: String,
}

/// Builder admission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderSettings {
    /// Replay window: maximum |now - timestamp| accepted, in milliseconds.
    #[serde(default = "default_timestamp_window_ms")]
    pub timestamp_window_ms: i64,
}

fn default_timestamp_window_ms() -> i64 {
    300_000
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            timestamp_window_ms: default_timestamp_window_ms(),
        }
    }
}

/// Confirmation monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Scan period in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Age after which a broadcast-but-unconfirmed transaction is repriced.
    #[serde(default = "default_rbf_threshold_secs")]
    pub rbf_threshold_secs: u64,

    /// Age after which a never-broadcast transaction is failed.
    #[serde(default = "default_dead_threshold_secs")]
    pub dead_threshold_secs: u64,

    /// Maximum pending rows examined per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Period of the nonce reconciliation pass against the chain.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

fn default_tick_secs() -> u64 {
    10
}
fn default_rbf_threshold_secs() -> u64 {
    30
}
fn default_dead_threshold_secs() -> u64 {
    300
}
fn default_batch_size() -> usize {
    100
}
fn default_reconcile_interval_secs() -> u64 {
    60
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            rbf_threshold_secs: default_rbf_threshold_secs(),
            dead_threshold_secs: default_dead_threshold_secs(),
            batch_size: default_batch_size(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl MonitorSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
    pub fn rbf_threshold_ms(&self) -> i64 {
        (self.rbf_threshold_secs as i64) * 1000
    }
    pub fn dead_threshold_ms(&self) -> i64 {
        (self.dead_threshold_secs as i64) * 1000
    }
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Database directory path.
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "relayer.db".to_string()
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Broadcast dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Capacity of each per-operator broadcast queue. Admissions beyond a
    /// full queue fail the row instead of piling up unbounded waiters.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl RelayerConfig {
    /// Load from an explicit TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load using `RELAYER_CONFIG` (falling back to `relayer.toml` when it
    /// exists, defaults otherwise), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(env::CONFIG_PATH) {
            Ok(path) => Self::from_file(path)?,
            Err(_) if Path::new("relayer.toml").exists() => Self::from_file("relayer.toml")?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment wins over file contents for deployment-specific values.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(env::RPC_URL) {
            self.chain.rpc_url = url;
        }
        if let Ok(id) = std::env::var(env::CHAIN_ID) {
            if let Ok(id) = id.parse() {
                self.chain.chain_id = id;
            }
        }
        if let Ok(key) = std::env::var(env::KMS_KEY) {
            self.security.kms_config = key;
        }
        if let Ok(path) = std::env::var(env::STORE_PATH) {
            self.store.path = path;
        }
    }

    /// Reject configurations that cannot possibly serve.
    pub fn validate(&self) -> Result<()> {
        if self.chain.rpc_url.is_empty() {
            bail!("chain.rpc_url is required");
        }
        if self.chain.chain_id == 0 {
            bail!("chain.chain_id is required");
        }
        if self.chain.gas_price_multiplier == 0 {
            bail!("chain.gas_price_multiplier must be positive");
        }
        if self.builder.timestamp_window_ms <= 0 {
            bail!("builder.timestamp_window_ms must be positive");
        }
        if self.monitor.tick_secs == 0 {
            bail!("monitor.tick_secs must be positive");
        }
        if self.monitor.batch_size == 0 {
            bail!("monitor.batch_size must be positive");
        }
        if self.store.path.is_empty() {
            bail!("store.path is required");
        }
        if self.dispatch.queue_capacity == 0 {
            bail!("dispatch.queue_capacity must be positive");
        }
        if self.security.kms_type == KmsBackend::Local {
            let key = BASE64
                .decode(self.security.kms_config.trim())
                .context("security.kms_config must be base64 for the local backend")?;
            if key.len() != 32 {
                bail!("security.kms_config must decode to exactly 32 bytes");
            }
        }
        Ok(())
    }

    /// Log the non-secret parts of the effective configuration.
    pub fn log_config(&self) {
        info!(
            rpc_url = %self.chain.rpc_url,
            chain_id = self.chain.chain_id,
            gas_price_multiplier = self.chain.gas_price_multiplier,
            kms_type = ?self.security.kms_type,
            timestamp_window_ms = self.builder.timestamp_window_ms,
            monitor_tick_secs = self.monitor.tick_secs,
            rbf_threshold_secs = self.monitor.rbf_threshold_secs,
            dead_threshold_secs = self.monitor.dead_threshold_secs,
            batch_size = self.monitor.batch_size,
            store_path = %self.store.path,
            "Relayer configuration loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RelayerConfig {
        let mut config = RelayerConfig::default();
        config.chain.rpc_url = "https://polygon-rpc.com".into();
        config.security.kms_config = BASE64.encode([1u8; 32]);
        config
    }

    #[test]
    fn test_defaults() {
        let config = RelayerConfig::default();
        assert_eq!(config.chain.chain_id, 137);
        assert_eq!(config.chain.gas_price_multiplier, 110);
        assert_eq!(config.builder.timestamp_window_ms, 300_000);
        assert_eq!(config.monitor.tick_secs, 10);
        assert_eq!(config.monitor.rbf_threshold_secs, 30);
        assert_eq!(config.monitor.dead_threshold_secs, 300);
        assert_eq!(config.monitor.batch_size, 100);
        assert_eq!(config.dispatch.queue_capacity, 256);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: RelayerConfig = toml::from_str(
            r#"
            [chain]
            rpc_url = "https://polygon-rpc.com"
            chain_id = 80002

            [security]
            kms_type = "local"
            "#,
        )
        .unwrap();

        assert_eq!(config.chain.chain_id, 80002);
        assert_eq!(config.chain.gas_price_multiplier, 110);
        assert_eq!(config.monitor.batch_size, 100);
        assert_eq!(config.security.kms_type, KmsBackend::Local);
    }

    #[test]
    fn test_kms_backend_wire_names() {
        let config: RelayerConfig = toml::from_str(
            r#"
            [security]
            kms_type = "aws-kms"
            "#,
        )
        .unwrap();
        assert_eq!(config.security.kms_type, KmsBackend::AwsKms);
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_rpc_url() {
        let mut config = valid_config();
        config.chain.rpc_url.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_kms_key() {
        let mut config = valid_config();
        config.security.kms_config = BASE64.encode([1u8; 16]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = valid_config();
        config.builder.timestamp_window_ms = 0;
        assert!(config.validate().is_err());
    }
}
