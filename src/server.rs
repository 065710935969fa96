//! HTTP listener, connection tasks and graceful drain.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//! [`ServerHandle::shutdown`] reacts by:
//!
//! 1. Stopping `listener.accept()` so no new connections are made.
//! 2. Telling every open connection to finish its current request and close.
//! 3. Waiting for those connections up to a deadline, then aborting them.
//!
//! Keep the deadline (`--web-shutdown-timeout`) below the grace period.
//!
//! # Timeouts
//!
//! | Setting | Bounds |
//! |---|---|
//! | `read_timeout` | receiving the request headers |
//! | `write_timeout` | producing the response; on expiry the connection is closed |
//! | `idle_timeout` | a keep-alive connection with no request in flight |
//!
//! Request bodies larger than `max_body_bytes` are refused with `413`.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::router::App;

/// Pause after an accept error caused by resource exhaustion.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
            max_body_bytes: 1 << 20,
        }
    }
}

/// Open connections outlived the drain deadline and were aborted.
#[derive(Debug, thiserror::Error)]
#[error("connections still open after {0:?}, aborted")]
pub struct DrainTimeout(pub Duration);

/// A bound, not yet serving, HTTP listener.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    /// Binds `addr`. Port `0` picks an ephemeral port; see [`local_addr`](Server::local_addr).
    pub async fn bind(addr: SocketAddr, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts the accept loop on its own task.
    ///
    /// A fatal accept error ends the loop and is offered to `errors` without
    /// blocking; if the slot is already taken the error is only logged.
    pub fn spawn(self, app: App, errors: mpsc::Sender<io::Error>) -> ServerHandle {
        let (drain, drain_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(self.listener, Arc::new(app), self.config, drain_rx, errors));
        ServerHandle { drain, task }
    }

    /// Serves until a fatal accept error, never draining. Used for the debug
    /// listener, which dies with the process.
    pub async fn serve(self, app: App) -> io::Result<()> {
        let (_drain, drain_rx) = watch::channel(false);
        let (errors, mut errors_rx) = mpsc::channel(1);
        accept_loop(self.listener, Arc::new(app), self.config, drain_rx, errors).await;
        match errors_rx.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }
}

/// Controls a running [`Server`].
pub struct ServerHandle {
    drain: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Stops accepting, lets open connections finish, and waits at most
    /// `timeout` for them. On expiry every connection task is aborted.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), DrainTimeout> {
        let Self { drain, mut task } = self;
        drain.send_replace(true);

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(_) => Ok(()),
            Err(_) => {
                // Dropping the accept task's JoinSet aborts every connection.
                task.abort();
                let _ = task.await;
                Err(DrainTimeout(timeout))
            }
        }
    }

    /// `true` once the accept loop has ended on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    app: Arc<App>,
    config: ServerConfig,
    mut drain: watch::Receiver<bool>,
    errors: mpsc::Sender<io::Error>,
) {
    let addr = listener.local_addr().ok();
    info!(addr = ?addr, "listening");

    let mut builder = ConnBuilder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(config.read_timeout);

    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            // Checked first so a drain request wins over queued connections.
            biased;

            () = drained(&mut drain) => {
                info!(addr = ?addr, in_flight = tasks.len(), "draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "accept error");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                    Err(e) => {
                        error!(addr = ?addr, error = %e, "listener failed");
                        if let Err(mpsc::error::TrySendError::Full(e)) = errors.try_send(e) {
                            warn!(error = %e, "server error dropped, another is pending");
                        }
                        break;
                    }
                };

                tasks.spawn(serve_connection(
                    builder.clone(),
                    stream,
                    remote_addr,
                    Arc::clone(&app),
                    config,
                    drain.clone(),
                ));
            }

            Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = res {
                    if e.is_panic() {
                        error!(error = %e, "connection task panicked");
                    }
                }
            }
        }
    }

    drop(listener);
    while tasks.join_next().await.is_some() {}
    info!(addr = ?addr, "stopped");
}

/// Resolves once draining was requested. Stays pending if the handle was
/// dropped without asking.
async fn drained(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|draining| *draining).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock | TimedOut
    ) || matches!(e.raw_os_error(), Some(23 | 24)) // ENFILE, EMFILE
}

// ── Connections ───────────────────────────────────────────────────────────────

async fn serve_connection(
    builder: ConnBuilder<TokioExecutor>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    app: Arc<App>,
    config: ServerConfig,
    mut drain: watch::Receiver<bool>,
) {
    let activity = Arc::new(Activity::new());

    // Called once per request on the connection, not once per connection.
    let svc = {
        let activity = Arc::clone(&activity);
        service_fn(move |req| {
            let guard = activity.begin();
            let app = Arc::clone(&app);
            async move {
                let res = handle(app, req, remote_addr, config).await;
                drop(guard);
                res
            }
        })
    };

    let conn = builder.serve_connection(TokioIo::new(stream), svc);
    tokio::pin!(conn);

    let idle = tokio::time::sleep(config.idle_timeout);
    tokio::pin!(idle);
    let mut closing = false;

    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(peer = %remote_addr, error = %e, "connection closed with error");
                }
                break;
            }

            () = drained(&mut drain), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }

            () = &mut idle, if !closing => match activity.idle_for() {
                Some(quiet) if quiet >= config.idle_timeout => {
                    debug!(peer = %remote_addr, "closing idle connection");
                    closing = true;
                    conn.as_mut().graceful_shutdown();
                }
                Some(quiet) => idle.as_mut().reset(Instant::now() + (config.idle_timeout - quiet)),
                None => idle.as_mut().reset(Instant::now() + config.idle_timeout),
            },
        }
    }
}

/// Reads the body up to the configured limit and runs the request through
/// the app within the write timeout.
///
/// An `Err` makes hyper close the connection without writing a response.
async fn handle(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    config: ServerConfig,
) -> Result<http::Response<Full<Bytes>>, Error> {
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, config.max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(peer = %remote_addr, limit = config.max_body_bytes, "request body too large");
            return Ok(Response::builder()
                .status(StatusCode::PAYLOAD_TOO_LARGE)
                .json(Bytes::from_static(br#"{"error":"Payload Too Large"}"#))
                .into_inner());
        }
        Err(e) => {
            warn!(peer = %remote_addr, error = %e, "failed to read request body");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_inner());
        }
    };
    let req = Request::new(parts.method, parts.uri, parts.headers, body, remote_addr);

    app.dispatch_within(req, config.write_timeout).await.map(Response::into_inner)
}

/// Tracks whether a connection has a request in flight and when it last did.
struct Activity {
    in_flight: AtomicUsize,
    last: Mutex<Instant>,
}

struct ActivityGuard(Arc<Activity>);

impl Activity {
    fn new() -> Self {
        Self { in_flight: AtomicUsize::new(0), last: Mutex::new(Instant::now()) }
    }

    fn begin(self: &Arc<Self>) -> ActivityGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        ActivityGuard(Arc::clone(self))
    }

    fn touch(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// `None` while a request is in flight, else the time since the last one.
    fn idle_for(&self) -> Option<Duration> {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return None;
        }
        Some(self.last.lock().unwrap_or_else(PoisonError::into_inner).elapsed())
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.0.touch();
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
