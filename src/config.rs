//! Service configuration.
//!
//! Configuration merges built-in defaults, `config.toml`, `config.yaml`, and
//! `SI_`-prefixed environment variables, in rising precedence, then runs a
//! validation pass. The core consumes these values; it does not own them.

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    5555
}
fn default_pool_size() -> usize {
    num_cpus::get()
}
fn default_max_outstanding() -> usize {
    100
}
fn default_model_path() -> PathBuf {
    PathBuf::from("model/weights.bin")
}

/// Application configuration loaded from multiple sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listening host
    #[serde(default = "default_server_host")]
    pub server_host: String,

    /// Listening port
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Worker pool size; defaults to the available parallelism
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Ceiling on concurrently admitted requests
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: usize,

    /// Path to the packed model weight file
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_server_port(),
            pool_size: default_pool_size(),
            max_outstanding: default_max_outstanding(),
            model_path: default_model_path(),
        }
    }
}

impl Config {
    /// Load configuration with precedence:
    /// 1. Environment variables prefixed `SI_` (highest priority)
    /// 2. config.yaml (if exists)
    /// 3. config.toml (if exists)
    /// 4. Built-in defaults (lowest priority)
    pub fn load() -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Yaml::file("config.yaml"))
            .merge(Env::prefixed("SI_"))
            .extract()
            .map_err(|e| AppError::Config(format!("failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// The address the transport binds.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.server_host.is_empty() {
            return Err(AppError::Config("server_host cannot be empty".to_string()));
        }

        if self.server_port == 0 {
            return Err(AppError::Config(
                "server_port must be between 1 and 65535".to_string(),
            ));
        }

        if self.pool_size == 0 {
            return Err(AppError::Config(
                "pool_size must be at least 1".to_string(),
            ));
        }

        if self.max_outstanding == 0 {
            return Err(AppError::Config(
                "max_outstanding must be at least 1".to_string(),
            ));
        }

        let path = self.model_path.to_string_lossy();
        if path.is_empty() || path.contains('\0') {
            return Err(AppError::Config("model_path is not a usable path".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_outstanding, 100);
        assert!(config.pool_size >= 1);
        assert_eq!(config.bind_addr(), format!("0.0.0.0:{}", config.server_port));
    }

    #[test]
    fn rejects_zero_valued_limits() {
        let mut config = Config::default();
        config.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_outstanding = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_an_empty_host_or_model_path() {
        let mut config = Config::default();
        config.server_host = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.model_path = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
