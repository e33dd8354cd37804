//! Share a local folder over HTTP on the local network.
//!
//! [`ServerLifecycle`] is the entry point: `start(root)` binds the listener and
//! spawns the serving loop, `stop()` shuts it down and releases the port. Every
//! transition is pushed to a [`StatusReporter`] for display.

pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod network;
pub mod routes;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

pub use config::ServerConfig;
pub use error::{FileServerError, StartError};
pub use lifecycle::{Ack, ServerLifecycle};
pub use status::{
    ChannelReporter, RunState, ServerInfo, StatusEvent, StatusReporter, TracingReporter,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Canonical root directory to serve files from
    pub root_dir: PathBuf,
    /// Configuration
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Create a new AppState with the given root directory and default config.
    pub fn new(root_dir: PathBuf) -> Self {
        Self::with_config(root_dir, ServerConfig::default())
    }

    /// Create a new AppState with the given root directory and config.
    ///
    /// Path checks compare against the canonical root, so the root is
    /// canonicalized here when possible.
    pub fn with_config(root_dir: PathBuf, config: ServerConfig) -> Self {
        Self {
            root_dir: root_dir.canonicalize().unwrap_or(root_dir),
            config: Arc::new(config),
        }
    }
}
