use crate::error::GatewayError;
use crate::governance::HookGovernance;
use config::{Config as Cfg, File};
use serde::Deserialize;
use std::time::Duration;

/// PostgreSQL connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Top-level gateway configuration.
///
/// `database` is optional: embedded deployments and the hermetic test
/// suites run against the in-memory backends.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Upper bound on row-lock acquisition before the retryable
    /// concurrency error surfaces.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub governance: HookGovernance,
}

fn default_service_name() -> String {
    "transaction-gateway".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

impl GatewayConfig {
    pub fn load() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            database: None,
            lock_timeout_ms: default_lock_timeout_ms(),
            governance: HookGovernance::default(),
        }
    }
}
