//! Typed configuration shared by every binary (spec §6 "Configuration").
//! Environment variables are the source of truth in every deployment;
//! `CommonArgs` lets a binary override them with CLI flags for local runs.

use std::env;
use std::time::Duration;

use clap::Args;

pub mod health;
pub use health::{spawn_health_server, spawn_health_server_with_metrics};

/// Loaded from environment variables, falling back to the documented
/// defaults (§6) when unset.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub max_code_size_bytes: usize,
    pub max_timeout_seconds: u32,
    pub default_timeout_seconds: u32,
    pub max_concurrent_evaluations: u32,
    pub blob_threshold_bytes: usize,
    pub preview_bytes: usize,
    pub broker_url: String,
    pub event_bus_url: String,
    pub storage_url: String,
    pub cluster_namespace: String,
    pub allow_sandbox_fallback: bool,
    pub retry_max_attempts: u32,
    pub retry_base_seconds: u64,
    pub retry_cap_seconds: u64,
    pub bind_addr: String,
    pub health_bind_addr: String,
}

impl Config {
    /// Load from the process environment, applying §6's documented
    /// defaults for anything unset. `broker_url`/`event_bus_url`/
    /// `storage_url` have no sane default and must be set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            max_code_size_bytes: env_usize("MAX_CODE_SIZE_BYTES", evalctl_types::limits::MAX_CODE_SIZE_BYTES)?,
            max_timeout_seconds: env_u32("MAX_TIMEOUT_SECONDS", evalctl_types::limits::MAX_TIMEOUT_SECONDS)?,
            default_timeout_seconds: env_u32(
                "DEFAULT_TIMEOUT_SECONDS",
                evalctl_types::limits::DEFAULT_TIMEOUT_SECONDS,
            )?,
            max_concurrent_evaluations: env_u32(
                "MAX_CONCURRENT_EVALUATIONS",
                evalctl_types::limits::MAX_CONCURRENT_EVALUATIONS,
            )?,
            blob_threshold_bytes: env_usize(
                "BLOB_THRESHOLD_BYTES",
                evalctl_types::limits::BLOB_THRESHOLD_BYTES,
            )?,
            preview_bytes: env_usize("PREVIEW_BYTES", evalctl_types::limits::PREVIEW_BYTES)?,
            broker_url: required_env("BROKER_URL")?,
            event_bus_url: required_env("EVENT_BUS_URL")?,
            storage_url: required_env("STORAGE_URL")?,
            cluster_namespace: env::var("CLUSTER_NAMESPACE").unwrap_or_else(|_| "default".to_string()),
            allow_sandbox_fallback: env_bool("ALLOW_SANDBOX_FALLBACK", cfg!(debug_assertions))?,
            retry_max_attempts: env_u32(
                "RETRY_MAX_ATTEMPTS",
                evalctl_types::limits::RETRY_MAX_ATTEMPTS,
            )?,
            retry_base_seconds: env_u64("RETRY_BASE_SECONDS", evalctl_types::limits::RETRY_BASE_SECONDS)?,
            retry_cap_seconds: env_u64("RETRY_CAP_SECONDS", evalctl_types::limits::RETRY_CAP_SECONDS)?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            health_bind_addr: env::var("HEALTH_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9090".to_string()),
        })
    }

    /// Apply CLI overrides on top of environment-derived defaults.
    pub fn apply_overrides(&mut self, overrides: &CommonArgs) {
        if let Some(url) = &overrides.storage_url {
            self.storage_url = url.clone();
        }
        if let Some(url) = &overrides.event_bus_url {
            self.event_bus_url = url.clone();
        }
        if let Some(url) = &overrides.broker_url {
            self.broker_url = url.clone();
        }
        if let Some(ns) = &overrides.namespace {
            self.cluster_namespace = ns.clone();
        }
        if let Some(addr) = &overrides.bind_addr {
            self.bind_addr = addr.clone();
        }
        if let Some(addr) = &overrides.health_bind_addr {
            self.health_bind_addr = addr.clone();
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        // §4.4: visibility timeout >= max_timeout + provisioning budget.
        Duration::from_secs(u64::from(self.max_timeout_seconds) + 15 * 60)
    }
}

/// CLI flags shared by every binary, layered over [`Config::from_env`].
#[derive(Args, Clone, Debug, Default)]
pub struct CommonArgs {
    #[arg(long, env = "STORAGE_URL")]
    pub storage_url: Option<String>,
    #[arg(long, env = "EVENT_BUS_URL")]
    pub event_bus_url: Option<String>,
    #[arg(long, env = "BROKER_URL")]
    pub broker_url: Option<String>,
    #[arg(long, env = "CLUSTER_NAMESPACE")]
    pub namespace: Option<String>,
    #[arg(long, env = "BIND_ADDR")]
    pub bind_addr: Option<String>,
    #[arg(long, env = "HEALTH_BIND_ADDR")]
    pub health_bind_addr: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingRequired(String),
    #[error("environment variable {name} has invalid value {value:?}: {source}")]
    InvalidValue {
        name: String,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("environment variable {name} has invalid boolean value {value:?}")]
    InvalidBool { name: String, value: String },
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingRequired(name.to_string()))
}

fn env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|source| ConfigError::InvalidValue {
                name: name.to_string(),
                value,
                source,
            }),
        Err(_) => Ok(default),
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|source| ConfigError::InvalidValue {
                name: name.to_string(),
                value,
                source,
            }),
        Err(_) => Ok(default),
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|source| ConfigError::InvalidValue {
                name: name.to_string(),
                value,
                source,
            }),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                name: name.to_string(),
                value,
            }),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_required_var_is_reported_by_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in ["BROKER_URL", "EVENT_BUS_URL", "STORAGE_URL"] {
            env::remove_var(var);
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(name) if name == "BROKER_URL"));
    }

    #[test]
    fn loads_defaults_when_optional_vars_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("BROKER_URL", "redis://localhost:6379");
        env::set_var("EVENT_BUS_URL", "redis://localhost:6379");
        env::set_var("STORAGE_URL", "http://localhost:9000");
        env::remove_var("MAX_TIMEOUT_SECONDS");
        let config = Config::from_env().unwrap();
        assert_eq!(config.max_timeout_seconds, evalctl_types::limits::MAX_TIMEOUT_SECONDS);
        env::remove_var("BROKER_URL");
        env::remove_var("EVENT_BUS_URL");
        env::remove_var("STORAGE_URL");
    }
}
