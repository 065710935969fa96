//! The process-wide shutdown flag.
//!
//! Created once at startup and handed to the [`App`](crate::App) and the
//! [`Orchestrator`](crate::lifecycle::Orchestrator). Set at most once, never
//! reset. The first writer wins; later writers are told they lost.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

/// Why the service is stopping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// An OS signal reached the process (`"SIGINT"`, `"SIGTERM"`).
    Signal(&'static str),
    /// A handler returned [`Error::Shutdown`](crate::Error::Shutdown).
    Requested(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "signal {name}"),
            Self::Requested(reason) => f.write_str(reason),
        }
    }
}

/// Cheaply cloneable handle to the shared flag.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

struct Inner {
    reason: OnceLock<ShutdownReason>,
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { inner: Arc::new(Inner { reason: OnceLock::new(), tx }) }
    }

    /// Marks the service as stopping. Returns `false` if it already was, in
    /// which case the original reason is kept.
    pub fn request(&self, reason: ShutdownReason) -> bool {
        if self.inner.reason.set(reason).is_err() {
            return false;
        }
        self.inner.tx.send_replace(true);
        true
    }

    pub fn is_requested(&self) -> bool {
        self.inner.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.inner.reason.get()
    }

    /// Resolves once shutdown has been requested; immediately if it already was.
    pub async fn requested(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownSignal").field("reason", &self.reason()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn first_request_wins() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_requested());

        assert!(signal.request(ShutdownReason::Signal("SIGTERM")));
        assert!(!signal.request(ShutdownReason::Requested("late".into())));

        assert_eq!(signal.reason(), Some(&ShutdownReason::Signal("SIGTERM")));
    }

    #[test]
    fn clones_share_the_flag() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        clone.request(ShutdownReason::Requested("integrity".into()));
        assert!(signal.is_requested());
        assert_eq!(signal.reason().unwrap().to_string(), "integrity");
    }

    #[tokio::test]
    async fn requested_wakes_waiters() {
        let signal = ShutdownSignal::new();
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.requested().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.request(ShutdownReason::Signal("SIGINT"));

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter not woken")
            .unwrap();
    }

    #[tokio::test]
    async fn requested_resolves_when_already_set() {
        let signal = ShutdownSignal::new();
        signal.request(ShutdownReason::Signal("SIGINT"));
        tokio::time::timeout(Duration::from_millis(100), signal.requested())
            .await
            .expect("already-set flag must resolve immediately");
    }
}
