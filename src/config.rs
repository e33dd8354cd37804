use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port the server binds to unless configured otherwise.
pub const DEFAULT_PORT: u16 = 1234;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port to listen on (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind to
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// Log every request and connection error
    #[serde(default)]
    pub verbose_logging: bool,

    /// Generate an HTML listing for directories without an index file.
    /// When disabled such directories answer 403.
    #[serde(default = "default_directory_listing")]
    pub directory_listing: bool,

    /// File served in place of a directory listing when present
    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// Upper bound on how long `stop()` waits for in-flight connections
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_directory_listing() -> bool {
    true
}

fn default_index_file() -> String {
    "index.html".to_string()
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            verbose_logging: false,
            directory_listing: default_directory_listing(),
            index_file: default_index_file(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Grace period for draining connections on stop
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
