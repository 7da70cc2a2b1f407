use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::measurement::hop_discovery::HopSettings;

const ENV_PREFIX: &str = "HOPWATCH_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: String,
    pub resolver_url: String,
    pub resolver_timeout_seconds: u64,
    pub resolver_cache_ttl_seconds: u64,
    pub max_hops: u8,
    pub hop_timeout_ms: u64,
    pub queries_per_hop: u8,
    pub icmp_ttl: u32,
    /// Zero disables the reconcile loop.
    pub reconcile_interval_seconds: u64,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug, Clone)]
pub struct PartialAppConfig {
    pub database_url: Option<String>,
    pub log_dir: Option<String>,
    pub resolver_url: Option<String>,
    pub resolver_timeout_seconds: Option<u64>,
    pub resolver_cache_ttl_seconds: Option<u64>,
    pub max_hops: Option<u8>,
    pub hop_timeout_ms: Option<u64>,
    pub queries_per_hop: Option<u8>,
    pub icmp_ttl: Option<u32>,
    pub reconcile_interval_seconds: Option<u64>,
}

impl PartialAppConfig {
    /// Fields set in `self` win over `lower`.
    fn or(self, lower: PartialAppConfig) -> PartialAppConfig {
        PartialAppConfig {
            database_url: self.database_url.or(lower.database_url),
            log_dir: self.log_dir.or(lower.log_dir),
            resolver_url: self.resolver_url.or(lower.resolver_url),
            resolver_timeout_seconds: self.resolver_timeout_seconds.or(lower.resolver_timeout_seconds),
            resolver_cache_ttl_seconds: self.resolver_cache_ttl_seconds.or(lower.resolver_cache_ttl_seconds),
            max_hops: self.max_hops.or(lower.max_hops),
            hop_timeout_ms: self.hop_timeout_ms.or(lower.hop_timeout_ms),
            queries_per_hop: self.queries_per_hop.or(lower.queries_per_hop),
            icmp_ttl: self.icmp_ttl.or(lower.icmp_ttl),
            reconcile_interval_seconds: self.reconcile_interval_seconds.or(lower.reconcile_interval_seconds),
        }
    }
}

// DATABASE_URL is read without the prefix, like every other sea-orm tool.
#[derive(Deserialize, Default, Debug)]
struct DatabaseEnv {
    database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://hopwatch.db?mode=rwc".to_string(),
            log_dir: "logs".to_string(),
            resolver_url: "http://ip-api.com/json/".to_string(),
            resolver_timeout_seconds: 5,
            resolver_cache_ttl_seconds: 3600,
            max_hops: 30,
            hop_timeout_ms: 1000,
            queries_per_hop: 2,
            icmp_ttl: 64,
            reconcile_interval_seconds: 30,
        }
    }
}

impl AppConfig {
    /// Defaults, then the optional TOML file, then environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path) => read_file(path)?,
            None => PartialAppConfig::default(),
        };

        let mut env_config: PartialAppConfig = envy::prefixed(ENV_PREFIX).from_env()?;
        if env_config.database_url.is_none() {
            env_config.database_url = envy::from_env::<DatabaseEnv>()?.database_url;
        }

        Self::from_layers(file_config, env_config)
    }

    pub fn from_layers(
        file_config: PartialAppConfig,
        env_config: PartialAppConfig,
    ) -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();
        let merged = env_config.or(file_config);

        let config = AppConfig {
            database_url: merged.database_url.unwrap_or(defaults.database_url),
            log_dir: merged.log_dir.unwrap_or(defaults.log_dir),
            resolver_url: merged.resolver_url.unwrap_or(defaults.resolver_url),
            resolver_timeout_seconds: merged
                .resolver_timeout_seconds
                .unwrap_or(defaults.resolver_timeout_seconds),
            resolver_cache_ttl_seconds: merged
                .resolver_cache_ttl_seconds
                .unwrap_or(defaults.resolver_cache_ttl_seconds),
            max_hops: merged.max_hops.unwrap_or(defaults.max_hops),
            hop_timeout_ms: merged.hop_timeout_ms.unwrap_or(defaults.hop_timeout_ms),
            queries_per_hop: merged.queries_per_hop.unwrap_or(defaults.queries_per_hop),
            icmp_ttl: merged.icmp_ttl.unwrap_or(defaults.icmp_ttl),
            reconcile_interval_seconds: merged
                .reconcile_interval_seconds
                .unwrap_or(defaults.reconcile_interval_seconds),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url must not be empty".into()));
        }
        if !(1..=64).contains(&self.max_hops) {
            return Err(ConfigError::Invalid(format!(
                "max_hops must be between 1 and 64, got {}",
                self.max_hops
            )));
        }
        if !(1..=5).contains(&self.queries_per_hop) {
            return Err(ConfigError::Invalid(format!(
                "queries_per_hop must be between 1 and 5, got {}",
                self.queries_per_hop
            )));
        }
        if !(1..=255).contains(&self.icmp_ttl) {
            return Err(ConfigError::Invalid(format!(
                "icmp_ttl must be between 1 and 255, got {}",
                self.icmp_ttl
            )));
        }
        if self.hop_timeout_ms == 0 || self.resolver_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn hop_settings(&self) -> HopSettings {
        HopSettings {
            max_hops: self.max_hops,
            hop_timeout: Duration::from_millis(self.hop_timeout_ms),
            queries_per_hop: self.queries_per_hop,
        }
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver_timeout_seconds)
    }

    pub fn resolver_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.resolver_cache_ttl_seconds)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_seconds > 0).then(|| Duration::from_secs(self.reconcile_interval_seconds))
    }
}

/// A missing file is not an error; the other layers still apply.
fn read_file(path: &Path) -> Result<PartialAppConfig, ConfigError> {
    if !path.exists() {
        return Ok(PartialAppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
