//! Server configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file
//! (or no file at all) is a valid starting point for command-line
//! overrides.
//!
//! ```toml
//! [listener]
//! address = "0.0.0.0"
//! port = 8000
//!
//! [tls]
//! cert = "certs/server.pem"
//! key = "certs/server.key"
//! ```

use crate::protocol::{DEFAULT_MAX_FRAME_LEN, HEADER_LEN};
use crate::runtime::{DEFAULT_QUEUE_CAPACITY, PoolConfig};

use std::fs;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Smallest accepted frame limit.
const MIN_FRAME_LEN: usize = 2 * HEADER_LEN;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listener: ListenerConfig,
    pub tls: TlsConfig,
    pub pool: PoolSection,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    pub address: String,
    pub port: u16,
    pub backlog: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".into(),
            port: 8000,
            backlog: 1024,
        }
    }
}

/// PEM material. `client_ca` enables optional client certificates.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub client_ca: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSection {
    /// Worker threads; `None` picks [`default_workers`](crate::runtime::default_workers).
    pub workers: Option<usize>,
    pub queue_capacity: usize,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    pub max_frame_len: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ServerConfig {
    /// Reads and parses a TOML file. The result is not validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Checks every field and reports all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.listener.address.parse::<IpAddr>().is_err() {
            problems.push(format!(
                "listener.address {:?} is not an IP address",
                self.listener.address
            ));
        }
        if self.listener.backlog == 0 {
            problems.push("listener.backlog must be > 0".to_string());
        }
        if self.pool.workers == Some(0) {
            problems.push("pool.workers must be > 0".to_string());
        }
        if self.pool.queue_capacity == 0 {
            problems.push("pool.queue_capacity must be > 0".to_string());
        }
        if self.protocol.max_frame_len < MIN_FRAME_LEN {
            problems.push(format!(
                "protocol.max_frame_len must be at least {MIN_FRAME_LEN}"
            ));
        }
        if self.tls.cert.is_none() {
            problems.push("tls.cert is required".to_string());
        }
        if self.tls.key.is_none() {
            problems.push("tls.key is required".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.listener.address.parse().map_err(|_| {
            ConfigError::Validation(vec![format!(
                "listener.address {:?} is not an IP address",
                self.listener.address
            )])
        })?;

        Ok(SocketAddr::new(ip, self.listener.port))
    }

    /// Pool sizing. Zero values fall back to the defaults; [`validate`]
    /// reports them.
    ///
    /// [`validate`]: Self::validate
    pub fn pool_config(&self) -> PoolConfig {
        let mut config = PoolConfig::new();

        if let Some(workers) = self.pool.workers.filter(|n| *n > 0) {
            config = config.workers(workers);
        }
        if self.pool.queue_capacity > 0 {
            config = config.queue_capacity(self.pool.queue_capacity);
        }

        config
    }
}
