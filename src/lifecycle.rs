//! Server lifecycle controller.
//!
//! A [`ServerLifecycle`] owns at most one running server instance. `start()`
//! validates the root, binds the listener and spawns the accept loop; `stop()`
//! cancels the loop, releases the listener and drains open connections within
//! the configured grace period. Both entry points are serialised by an async
//! mutex, so concurrent callers observe the single-active-instance rule.
//!
//! # Shutdown sequence
//!
//! 1. The cancellation token fires. The accept loop selects on it, so a blocked
//!    `accept()` is interrupted rather than polled.
//! 2. The listener is dropped immediately; the port is free from here on.
//! 3. Every open connection is asked to shut down gracefully: a response being
//!    written is finished, idle keep-alive connections are closed.
//! 4. Connections still open after `shutdown_timeout` are aborted.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::StartError;
use crate::network;
use crate::routes;
use crate::status::{RunState, ServerInfo, StatusEvent, StatusReporter};
use crate::AppState;

/// Non-connection accept errors tolerated in a row before the server gives up.
const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 5;

/// Pause after an accept error such as running out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Acknowledgement returned by [`ServerLifecycle::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// A serving instance was shut down. `forced_connections` counts the
    /// connections aborted after the grace period ran out.
    Stopped { forced_connections: usize },
    /// Nothing was serving; the call had no effect.
    NotRunning,
}

/// State reachable from both the lifecycle and its serving task.
struct Shared {
    state: watch::Sender<RunState>,
    reporter: Arc<dyn StatusReporter>,
}

impl Shared {
    fn transition(&self, state: RunState, message: impl Into<String>, info: Option<ServerInfo>) {
        self.state.send_replace(state);
        self.reporter.on_status_changed(&StatusEvent {
            state,
            message: message.into(),
            info,
        });
    }

    /// Move to `state` only if the current state is `from`. Returns whether the
    /// transition happened; the reporter is told only when it did.
    fn transition_from(
        &self,
        from: RunState,
        state: RunState,
        message: impl Into<String>,
        info: Option<ServerInfo>,
    ) -> bool {
        let moved = self.state.send_if_modified(|current| {
            if *current != from {
                return false;
            }
            *current = state;
            true
        });
        if moved {
            self.reporter.on_status_changed(&StatusEvent {
                state,
                message: message.into(),
                info,
            });
        }
        moved
    }
}

/// The running server instance. The listener itself lives in the serving task.
struct ActiveServer {
    info: ServerInfo,
    shutdown: CancellationToken,
    task: JoinHandle<DrainReport>,
}

#[derive(Debug, Default)]
struct DrainReport {
    forced_connections: usize,
}

/// Starts and stops the file server for one root directory at a time.
pub struct ServerLifecycle {
    config: Arc<ServerConfig>,
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveServer>>,
}

impl ServerLifecycle {
    pub fn new(config: ServerConfig, reporter: impl StatusReporter + 'static) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            config: Arc::new(config),
            shared: Arc::new(Shared {
                state,
                reporter: Arc::new(reporter),
            }),
            active: Mutex::new(None),
        }
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        *self.shared.state.borrow()
    }

    /// Watch run state changes, including failures raised by the serving task
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.shared.state.subscribe()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Snapshot of the serving instance, if any
    pub async fn info(&self) -> Option<ServerInfo> {
        let active = self.active.lock().await;
        match self.state() {
            RunState::Serving => active.as_ref().map(|server| server.info.clone()),
            _ => None,
        }
    }

    /// Serve `root` over HTTP.
    ///
    /// Fails with [`StartError::AlreadyServing`] while another instance is
    /// active, leaving it untouched. A previous stopped or failed instance is
    /// cleaned up and the state reset to `Idle` first.
    pub async fn start(&self, root: impl AsRef<Path>) -> Result<ServerInfo, StartError> {
        let root = root.as_ref();
        let mut active = self.active.lock().await;

        let previous_state = self.state();
        if previous_state.is_active() {
            return Err(StartError::AlreadyServing);
        }

        // A serving task that died on a fatal accept error is still owned here
        if let Some(previous) = active.take() {
            previous.shutdown.cancel();
            if let Err(err) = previous.task.await {
                warn!("Previous serving task ended abnormally: {}", err);
            }
        }

        if matches!(previous_state, RunState::Stopped | RunState::Failed) {
            self.shared.transition(RunState::Idle, "Choose a folder to serve.", None);
        }

        self.shared.transition(
            RunState::Starting,
            format!("Starting server for {}", root.display()),
            None,
        );

        let root_dir = validate_root(root).map_err(|err| self.fail(err))?;

        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| self.fail(StartError::Bind { addr, source }))?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| self.fail(StartError::Bind { addr, source }))?;

        let info = ServerInfo {
            ip_address: network::advertised_ipv4(self.config.bind),
            port: local_addr.port(),
            root_directory: root_dir.clone(),
        };

        let router = routes::build_router(AppState {
            root_dir,
            config: self.config.clone(),
        });
        let shutdown = CancellationToken::new();

        // Reported before the accept loop exists, so no connection is accepted
        // ahead of the ServerInfo
        self.shared.transition(
            RunState::Serving,
            format!("Serving at {}\nFolder: {}", info.url(), info.root_directory.display()),
            Some(info.clone()),
        );

        let task = tokio::spawn(accept_loop(
            listener,
            router,
            shutdown.clone(),
            self.config.clone(),
            self.shared.clone(),
        ));

        *active = Some(ActiveServer {
            info: info.clone(),
            shutdown,
            task,
        });

        Ok(info)
    }

    /// Stop serving. Idempotent: returns [`Ack::NotRunning`] when idle.
    ///
    /// The port is released before this returns.
    pub async fn stop(&self) -> Ack {
        let mut active = self.active.lock().await;

        let Some(server) = active.take() else {
            return Ack::NotRunning;
        };

        // Races with a fatal accept error in the serving task; whichever leaves
        // Serving first decides between Stopped and Failed
        let serving = self.shared.transition_from(
            RunState::Serving,
            RunState::Stopping,
            "Stopping server...",
            None,
        );

        server.shutdown.cancel();
        let report = match server.task.await {
            Ok(report) => report,
            Err(err) => {
                warn!("Serving task ended abnormally: {}", err);
                DrainReport::default()
            }
        };

        if !serving {
            // The task had already failed; the failure was reported then
            return Ack::NotRunning;
        }

        let message = if report.forced_connections > 0 {
            warn!(
                "{} connection(s) still open after {:?}, closed forcibly",
                report.forced_connections,
                self.config.shutdown_timeout()
            );
            format!(
                "Server stopped. {} connection(s) did not finish in time and were closed.",
                report.forced_connections
            )
        } else {
            "Server stopped.".to_string()
        };
        self.shared.transition(RunState::Stopped, message, None);

        Ack::Stopped {
            forced_connections: report.forced_connections,
        }
    }

    fn fail(&self, err: StartError) -> StartError {
        self.shared
            .transition(RunState::Failed, format!("Error: {}", err), None);
        err
    }
}

impl Drop for ServerLifecycle {
    fn drop(&mut self) {
        if let Some(server) = self.active.get_mut().take() {
            server.shutdown.cancel();
        }
    }
}

/// Check the root exists, is a directory and can be listed.
fn validate_root(root: &Path) -> Result<PathBuf, StartError> {
    let invalid = |reason: String| StartError::InvalidRoot {
        path: root.to_path_buf(),
        reason,
    };

    let canonical = root.canonicalize().map_err(|err| invalid(err.to_string()))?;

    if !canonical.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }

    std::fs::read_dir(&canonical).map_err(|err| invalid(format!("not readable: {}", err)))?;

    Ok(canonical)
}

/// Errors caused by a single client going away between SYN and accept.
fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
    config: Arc<ServerConfig>,
    shared: Arc<Shared>,
) -> DrainReport {
    let verbose = config.verbose_logging;
    let mut connections = JoinSet::new();
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    consecutive_errors = 0;
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        router.clone(),
                        shutdown.clone(),
                        verbose,
                    ));
                }
                Err(err) if is_connection_error(&err) => {
                    if verbose {
                        debug!("Client dropped before accept: {}", err);
                    }
                }
                Err(err) => {
                    consecutive_errors += 1;
                    warn!(
                        "Accept failed ({}/{}): {}",
                        consecutive_errors, MAX_CONSECUTIVE_ACCEPT_ERRORS, err
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_ACCEPT_ERRORS {
                        // A concurrent stop() already owns the final transition
                        shared.transition_from(
                            RunState::Serving,
                            RunState::Failed,
                            format!("Error: server stopped accepting connections: {}", err),
                            None,
                        );
                        break;
                    }
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            },
        }
    }

    drop(listener);
    info!("Listener closed, draining {} connection(s)", connections.len());

    drain(connections, config.shutdown_timeout()).await
}

/// Wait for connections to finish, aborting whatever is left after `grace`.
async fn drain(mut connections: JoinSet<()>, grace: Duration) -> DrainReport {
    let finished = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if finished.is_ok() {
        return DrainReport::default();
    }

    let forced_connections = connections.len();
    connections.shutdown().await;

    DrainReport { forced_connections }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
    verbose: bool,
) {
    let service = TowerToHyperService::new(router);
    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        () = shutdown.cancelled() => {
            // Finishes the response in flight, then closes instead of keeping alive
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };

    // Client resets and half-written responses only concern this connection
    if let Err(err) = result {
        if verbose {
            debug!(%peer, "Connection error: {}", err);
        }
    }
}
