//! Request-scoped context.
//!
//! Every request carries a [`Context`]: a typed extension map plus a handle to
//! the process [`ShutdownSignal`]. The [`App`](crate::App) puts a fresh
//! [`RequestState`] in it before the first middleware runs; authentication
//! middleware may add [`Claims`].

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use http::{Extensions, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::shutdown::ShutdownSignal;

/// Per-request values, created by the [`App`](crate::App) on arrival.
///
/// Cloning is cheap and every clone observes the same status code. The status
/// is recorded once, from the response the request actually ends with.
#[derive(Debug, Clone)]
pub struct RequestState {
    trace_id: Uuid,
    now: DateTime<Utc>,
    started: Instant,
    status_code: Arc<OnceLock<StatusCode>>,
}

impl RequestState {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            now: Utc::now(),
            started: Instant::now(),
            status_code: Arc::new(OnceLock::new()),
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    /// Arrival time.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `None` until a response has been produced.
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status_code.get().copied()
    }

    /// Records the status of the response this request ends with. Only the
    /// first call per request has an effect; returns whether it was this one.
    pub(crate) fn record_status(&self, status: StatusCode) -> bool {
        self.status_code.set(status).is_ok()
    }
}

impl Default for RequestState {
    fn default() -> Self {
        Self::new()
    }
}

/// Authenticated identity attached by an authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "sub")]
    pub subject: String,
    pub roles: BTreeSet<String>,
    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl Claims {
    /// True if the claims hold at least one of `roles`.
    pub fn authorized(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.roles.contains(*role))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Request-scoped context handed to every handler and middleware.
#[derive(Debug, Clone)]
pub struct Context {
    extensions: Extensions,
    shutdown: ShutdownSignal,
}

impl Context {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self { extensions: Extensions::new(), shutdown }
    }

    /// The values the [`App`](crate::App) attached to this request.
    ///
    /// Missing state means the handler is being driven outside an `App`: a
    /// wiring bug, reported as [`Error::Internal`].
    pub fn state(&self) -> Result<&RequestState, Error> {
        self.extensions
            .get::<RequestState>()
            .ok_or_else(|| Error::internal(anyhow!("request state missing from context")))
    }

    pub fn claims(&self) -> Option<&Claims> {
        self.extensions.get::<Claims>()
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    /// Stores a value, returning the previous one of the same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions.insert(value)
    }

    pub fn with<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }
}
