//! Service configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML file (`ledger.toml`, or the path in `LEDGER_CONFIG`), then
//! `LEDGER__*` environment variables, e.g. `LEDGER__APPEND__MAX_ATTEMPTS=8`.

pub mod policy;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::audit::merkle::RollupKind;
use crate::error::{LedgerError, LedgerResult};

pub use policy::RetentionPolicies;

const DEFAULT_CONFIG_FILE: &str = "ledger.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub server: ServerConfig,
    pub append: AppendConfig,
    pub verify: VerifyConfig,
    pub retention: RetentionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ledger.db".to_string(),
            server: ServerConfig::default(),
            append: AppendConfig::default(),
            verify: VerifyConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Conflict retry tuning for appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppendConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 10,
            max_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub page_size: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self { page_size: 500 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Run the retention scheduler inside the service.
    pub enabled: bool,
    pub interval_secs: u64,
    pub erasure_retry_interval_secs: u64,
    pub erasure_batch_size: usize,
    pub lease_ttl_secs: u64,
    pub page_size: u64,
    pub rollup_kind: RollupKind,
    /// YAML file with the default and per-tenant policies.
    pub policy_file: Option<String>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            erasure_retry_interval_secs: 300,
            erasure_batch_size: 100,
            lease_ttl_secs: 900,
            page_size: 500,
            rollup_kind: RollupKind::Flat,
            policy_file: None,
        }
    }
}

impl RetentionConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Policies from `policy_file`, or the built-in default when unset.
    pub fn load_policies(&self) -> LedgerResult<RetentionPolicies> {
        match &self.policy_file {
            Some(path) => RetentionPolicies::load(Path::new(path)),
            None => Ok(RetentionPolicies::default()),
        }
    }
}

impl AppConfig {
    /// Load from `LEDGER_CONFIG` (or `ledger.toml` when present) and the
    /// environment.
    pub fn load() -> LedgerResult<Self> {
        match env::var("LEDGER_CONFIG") {
            Ok(path) => Self::load_from(Some(Path::new(&path))),
            Err(_) => Self::load_from(None),
        }
    }

    /// An explicit `path` must exist; without one, `ledger.toml` is optional.
    pub fn load_from(path: Option<&Path>) -> LedgerResult<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: AppConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.database_url.is_empty() {
            return Err(LedgerError::ConfigError("database_url must be set".to_string()));
        }
        if self.append.max_attempts == 0 {
            return Err(LedgerError::ConfigError(
                "append.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.append.base_backoff_ms > self.append.max_backoff_ms {
            return Err(LedgerError::ConfigError(format!(
                "append.base_backoff_ms ({}) exceeds append.max_backoff_ms ({})",
                self.append.base_backoff_ms, self.append.max_backoff_ms
            )));
        }
        if self.verify.page_size == 0 || self.retention.page_size == 0 {
            return Err(LedgerError::ConfigError("page_size must be at least 1".to_string()));
        }
        if self.retention.lease_ttl_secs == 0 {
            return Err(LedgerError::ConfigError(
                "retention.lease_ttl_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
