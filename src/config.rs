use serde_derive::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::compiler::Dialect;
use crate::error::RepositoryError;

pub const CONNECTION_TIMEOUT_SECONDS_DEFAULT: u64 = 3;
pub const COMMAND_TIMEOUT_SECONDS_DEFAULT: u64 = 30;
pub const POOL_MAX_CONNECTIONS_DEFAULT: u32 = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connection string handed to the connection factory
    pub url: String,

    /// Timeout in seconds for acquiring and validating a connection
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    /// Max. number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connections older than this many seconds are replaced on recycle; `None` keeps them
    #[serde(default)]
    pub max_lifetime_seconds: Option<u64>,
}

fn default_connect_timeout_seconds() -> u64 {
    CONNECTION_TIMEOUT_SECONDS_DEFAULT
}

fn default_max_connections() -> u32 {
    POOL_MAX_CONNECTIONS_DEFAULT
}

fn default_command_timeout_seconds() -> Option<u64> {
    Some(COMMAND_TIMEOUT_SECONDS_DEFAULT)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            connect_timeout_seconds: CONNECTION_TIMEOUT_SECONDS_DEFAULT,
            max_connections: POOL_MAX_CONNECTIONS_DEFAULT,
            max_lifetime_seconds: None,
        }
    }
}

impl PoolConfig {
    pub fn new(url: impl Into<String>, connect_timeout_seconds: u64, max_connections: u32) -> Self {
        Self {
            url: url.into(),
            connect_timeout_seconds,
            max_connections,
            max_lifetime_seconds: None,
        }
    }

    pub fn connection_url(&self) -> Result<Url, RepositoryError> {
        Url::parse(&self.url)
            .map_err(|e| RepositoryError::Config(format!("invalid connection url: {}", e)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub pool: PoolConfig,

    /// Per-statement timeout in seconds passed to the executor; `None` leaves it to the backend
    #[serde(default = "default_command_timeout_seconds")]
    pub command_timeout_seconds: Option<u64>,

    /// SQL dialect of the bundled compiler
    #[serde(default)]
    pub dialect: Dialect,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            command_timeout_seconds: Some(COMMAND_TIMEOUT_SECONDS_DEFAULT),
            dialect: Dialect::default(),
        }
    }
}

impl RepositoryConfig {
    pub fn new(pool: PoolConfig, command_timeout_seconds: Option<u64>, dialect: Dialect) -> Self {
        Self {
            pool,
            command_timeout_seconds,
            dialect,
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_seconds.map(Duration::from_secs)
    }
}
