//! Config module contains the top-level config for the app.
use std::env;
use std::process;
use std::time::Duration;

use config_crate::{Config as RawConfig, ConfigError, Environment, File};
use uuid::Uuid;

use sentry_integration::SentryConfig;

/// Basic settings - master database url and worker thread count
#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub database: String,
    pub thread_count: usize,
    pub connection_timeout_ms: u64,
}

/// Settings for the per-store database pools and credential encryption
#[derive(Debug, Deserialize, Clone)]
pub struct Tenants {
    /// Base64 encoded 32 byte key used for AES-256-GCM
    pub encryption_key: String,
    pub pool_max_size: u32,
    pub pool_min_idle: u32,
    pub connection_timeout_ms: u64,
    pub idle_timeout_sec: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Jobs {
    /// Lease holder name, must differ between running workers
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
    pub poll_interval_ms: u64,
    pub lease_sec: u64,
    pub batch_size: usize,
    pub retry_backoff_sec: u64,
    pub default_max_retries: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Logging {
    pub level: String,
}

/// Global app config
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: Server,
    pub tenants: Tenants,
    pub jobs: Jobs,
    pub logging: Logging,
    pub sentry: Option<SentryConfig>,
}

/// Pool settings applied to every store database pool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TenantPoolSettings {
    pub max_size: u32,
    pub min_idle: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for TenantPoolSettings {
    fn default() -> Self {
        Self {
            max_size: 5,
            min_idle: 0,
            connection_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl From<Tenants> for TenantPoolSettings {
    fn from(tenants: Tenants) -> Self {
        let max_size = tenants.pool_max_size.max(1);
        Self {
            max_size,
            // r2d2 refuses a min_idle above max_size
            min_idle: tenants.pool_min_idle.min(max_size),
            connection_timeout: Duration::from_millis(tenants.connection_timeout_ms),
            idle_timeout: Duration::from_secs(tenants.idle_timeout_sec),
        }
    }
}

/// Host name and pid, with a random suffix for hosts that do not export `HOSTNAME`
pub fn default_worker_id() -> String {
    let host = env::var("HOSTNAME").unwrap_or_else(|_| "tenancy".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", host, process::id(), &suffix[..8])
}

impl Jobs {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_sec)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_sec)
    }
}

impl Config {
    /// Creates new app config struct
    /// #Examples
    /// ```
    /// use tenancy_lib::config::*;
    ///
    /// let config = Config::new();
    /// ```
    pub fn new() -> Result<Self, ConfigError> {
        let mut s = RawConfig::new();
        s.merge(File::with_name("config/base"))?;

        // Note that this file is _optional_
        let env = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        s.merge(File::with_name(&format!("config/{}", env)).required(false))?;

        // Add in settings from the environment (with a prefix of TENANCY)
        s.merge(Environment::with_prefix("TENANCY"))?;

        s.try_into()
    }

    pub fn tenant_pool_settings(&self) -> TenantPoolSettings {
        self.tenants.clone().into()
    }
}
