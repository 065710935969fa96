//! Startup, serving and shutdown of the whole process.
//!
//! ```text
//! Starting ──► Serving ──► Draining ──► Stopped
//! ```
//!
//! The first of three events ends `Serving`: the API listener failing, an OS
//! signal, or a handler returning [`Error::Shutdown`](crate::Error::Shutdown).
//! Every path drains through [`ServerHandle::shutdown`](crate::ServerHandle::shutdown)
//! exactly once.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::debug::debug_mux;
use crate::handlers::{ApiMuxConfig, api_mux};
use crate::router::App;
use crate::server::{DrainTimeout, Server, ServerConfig, ServerHandle};
use crate::shutdown::{ShutdownReason, ShutdownSignal};

/// Build identifier, set through the `BUILD` environment variable at compile time.
pub const BUILD: &str = match option_env!("BUILD") {
    Some(build) => build,
    None => "develop",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Serving,
    Draining,
    Stopped,
}

/// Why the process stopped, when it did not stop cleanly.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("binding api listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("installing signal handlers")]
    Signals(#[source] io::Error),

    #[error("server error")]
    Server(#[source] io::Error),

    #[error("could not stop server gracefully")]
    ShutdownTimeout(#[from] DrainTimeout),

    /// Drained cleanly, but a handler asked for the stop: exit non-zero so the
    /// supervisor restarts the process.
    #[error("shutdown requested: {0}")]
    ShutdownRequested(String),
}

impl RunError {
    /// Lifecycle stage the failure belongs to, used as the log message.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Bind { .. } | Self::Signals(_) => "startup",
            Self::Server(_) => "serving",
            Self::ShutdownTimeout(_) | Self::ShutdownRequested(_) => "shutdown",
        }
    }
}

enum Cause {
    Server(io::Error),
    Signal(&'static str),
    Requested(String),
}

/// Drives one API server from `Serving` to `Stopped`.
pub struct Orchestrator {
    shutdown: ShutdownSignal,
    shutdown_timeout: Duration,
    phase: Phase,
    observer: Option<mpsc::UnboundedSender<Phase>>,
}

impl Orchestrator {
    pub fn new(shutdown: ShutdownSignal, shutdown_timeout: Duration) -> Self {
        Self { shutdown, shutdown_timeout, phase: Phase::Starting, observer: None }
    }

    /// Reports every later phase change on the returned channel.
    pub fn observe(&mut self) -> mpsc::UnboundedReceiver<Phase> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observer = Some(tx);
        rx
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn transition(&mut self, next: Phase) {
        info!(from = ?self.phase, to = ?next, "lifecycle");
        self.phase = next;
        if let Some(observer) = &self.observer {
            let _ = observer.send(next);
        }
    }

    /// Serves `app` on `api` until the first stop event, then drains.
    ///
    /// `signals` resolves with the name of the OS signal received; see
    /// [`shutdown_signals`].
    pub async fn run(
        self,
        api: Server,
        app: App,
        signals: impl Future<Output = &'static str>,
    ) -> Result<(), RunError> {
        let addr = api.local_addr().ok();
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let handle = api.spawn(app, errors_tx);
        info!(addr = ?addr, "api router started");
        self.supervise(handle, errors_rx, signals).await
    }

    /// Drives an already running server. `errors` carries the server's
    /// terminal errors; only the first event of any kind is acted on.
    pub async fn supervise(
        mut self,
        handle: ServerHandle,
        mut errors: mpsc::Receiver<io::Error>,
        signals: impl Future<Output = &'static str>,
    ) -> Result<(), RunError> {
        self.transition(Phase::Serving);

        let shutdown = self.shutdown.clone();
        let cause = tokio::select! {
            Some(err) = errors.recv() => Cause::Server(err),
            name = signals => {
                shutdown.request(ShutdownReason::Signal(name));
                Cause::Signal(name)
            }
            () = shutdown.requested() => Cause::Requested(
                shutdown.reason().map(ToString::to_string).unwrap_or_default(),
            ),
        };

        match &cause {
            Cause::Server(err) => error!(error = %err, "server error, shutting down"),
            Cause::Signal(name) => info!(signal = name, "shutdown started"),
            Cause::Requested(reason) => warn!(%reason, "shutdown requested by handler"),
        }

        self.transition(Phase::Draining);
        let drained = handle.shutdown(self.shutdown_timeout).await;
        self.transition(Phase::Stopped);

        match cause {
            Cause::Server(err) => {
                if let Err(timeout) = drained {
                    warn!(error = %timeout, "drain after server error timed out");
                }
                Err(RunError::Server(err))
            }
            Cause::Signal(name) => {
                drained?;
                info!(signal = name, "shutdown complete");
                Ok(())
            }
            Cause::Requested(reason) => {
                drained?;
                Err(RunError::ShutdownRequested(reason))
            }
        }
    }
}

/// Installs the handlers for SIGTERM and SIGINT (Ctrl-C only on non-Unix).
/// The future resolves with the name of the first one received.
pub fn shutdown_signals() -> io::Result<impl Future<Output = &'static str>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())?;
        let mut int = signal(SignalKind::interrupt())?;
        Ok(async move {
            tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
            }
        })
    }

    #[cfg(not(unix))]
    {
        Ok(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(_) => std::future::pending().await,
            }
        })
    }
}

/// Runs the service described by `cfg` until it stops.
pub async fn run(cfg: Config) -> Result<(), RunError> {
    info!(version = BUILD, "starting service");
    info!(config = ?cfg, "startup");

    let shutdown = ShutdownSignal::new();
    let server_config = ServerConfig::from(&cfg);

    // Not part of the drain: it lives until the process exits.
    let debug = debug_mux(shutdown.clone(), BUILD);
    let debug_host = cfg.web_debug_host;
    tokio::spawn(async move {
        info!(host = %debug_host, "debug router started");
        let served = match Server::bind(debug_host, server_config).await {
            Ok(server) => server.serve(debug).await,
            Err(e) => Err(e),
        };
        if let Err(e) = served {
            error!(host = %debug_host, error = %e, "debug router closed");
        }
    });

    let api = Server::bind(cfg.web_api_host, server_config)
        .await
        .map_err(|source| RunError::Bind { addr: cfg.web_api_host, source })?;
    let app = api_mux(ApiMuxConfig { shutdown: shutdown.clone(), ..Default::default() });
    let signals = shutdown_signals().map_err(RunError::Signals)?;

    Orchestrator::new(shutdown, cfg.web_shutdown_timeout)
        .run(api, app, signals)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_attributed_to_their_stage() {
        let bind = RunError::Bind {
            addr: "127.0.0.1:3000".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert_eq!(bind.stage(), "startup");
        assert_eq!(RunError::Server(io::Error::other("accept failed")).stage(), "serving");
        assert_eq!(RunError::ShutdownTimeout(DrainTimeout(Duration::from_secs(20))).stage(), "shutdown");
        assert_eq!(RunError::ShutdownRequested("integrity".into()).stage(), "shutdown");
    }
}
