//! Server configuration from the environment.

use std::net::{AddrParseError, SocketAddr};
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_SAVE_RETRY_BACKOFF_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SERVER_ADDR {value:?} is not a socket address: {source}")]
    InvalidAddr {
        value: String,
        #[source]
        source: AddrParseError,
    },

    #[error("GAMBIT_SAVE_RETRY_BACKOFF_MS {value:?} is not a number of milliseconds: {source}")]
    InvalidBackoff {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Directory for snapshot files; in-memory storage when unset
    pub snapshot_dir: Option<PathBuf>,
    pub save_retry_backoff: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let addr_value = lookup("SERVER_ADDR").unwrap_or_else(|| DEFAULT_ADDR.into());
        let addr: SocketAddr = addr_value
            .parse()
            .map_err(|source| ConfigError::InvalidAddr {
                value: addr_value.clone(),
                source,
            })?;

        let snapshot_dir = lookup("GAMBIT_SNAPSHOT_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        let save_retry_backoff = match lookup("GAMBIT_SAVE_RETRY_BACKOFF_MS") {
            Some(value) => {
                let ms = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|source| ConfigError::InvalidBackoff {
                        value: value.clone(),
                        source,
                    })?;
                Duration::from_millis(ms)
            }
            None => Duration::from_millis(DEFAULT_SAVE_RETRY_BACKOFF_MS),
        };

        Ok(Self {
            addr,
            snapshot_dir,
            save_retry_backoff,
        })
    }
}
