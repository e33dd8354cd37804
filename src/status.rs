//! Lifecycle status values and the reporter boundary used by front ends.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Run state of the server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Starting,
    Serving,
    Stopping,
    Stopped,
    Failed,
}

impl RunState {
    /// Starting or Serving; at most one instance may be in these states.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Starting | RunState::Serving)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Starting => "starting",
            RunState::Serving => "serving",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of a successfully started server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub ip_address: Ipv4Addr,
    pub port: u16,
    pub root_directory: PathBuf,
}

impl ServerInfo {
    /// URL other devices on the LAN can open
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.ip_address, self.port)
    }
}

/// One lifecycle transition.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub state: RunState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<ServerInfo>,
}

/// Receives every lifecycle transition.
///
/// Called from whichever task performs the transition, including the serving
/// task, so implementations must be thread-safe and must not call back into the
/// lifecycle synchronously.
pub trait StatusReporter: Send + Sync {
    fn on_status_changed(&self, event: &StatusEvent);
}

impl<F> StatusReporter for F
where
    F: Fn(&StatusEvent) + Send + Sync,
{
    fn on_status_changed(&self, event: &StatusEvent) {
        self(event)
    }
}

/// Logs transitions through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn on_status_changed(&self, event: &StatusEvent) {
        match event.state {
            RunState::Failed => error!(state = %event.state, "{}", event.message),
            _ => info!(state = %event.state, "{}", event.message),
        }
    }
}

/// Forwards transitions into a channel so a UI can consume them on its own task.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusReporter for ChannelReporter {
    fn on_status_changed(&self, event: &StatusEvent) {
        // Receiver gone means nobody is displaying status any more.
        let _ = self.tx.send(event.clone());
    }
}
