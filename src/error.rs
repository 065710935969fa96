//! The classified error every handler and middleware returns.
//!
//! Handlers pick the most specific variant they can:
//!
//! | Variant | Cause | Client sees |
//! |---|---|---|
//! | [`Error::Validation`] | the client sent something wrong | its status + message + field errors |
//! | [`Error::Internal`] | anything unexpected | `500 {"error":"Internal Server Error"}` |
//! | [`Error::Shutdown`] | the service must stop | nothing, the connection is closed |
//!
//! The [`errors`](crate::middleware::errors) middleware does the translation.
//! Anything it does not catch is translated the same way at the [`App`]
//! boundary.
//!
//! [`App`]: crate::App

use http::StatusCode;
use serde::Serialize;

/// Generic body sent for every [`Error::Internal`]. The real cause is logged.
pub(crate) const INTERNAL_MESSAGE: &str = "Internal Server Error";

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub error: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, error: impl Into<String>) -> Self {
        Self { field: field.into(), error: error.into() }
    }
}

/// Wire shape of every error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl ErrorResponse {
    /// The body every internal failure gets.
    pub fn internal() -> Self {
        Self { error: INTERNAL_MESSAGE.to_owned(), fields: Vec::new() }
    }
}

/// The error type returned by handlers and middleware.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client-caused. The message and fields are safe to expose.
    #[error("{message}")]
    Validation {
        status: StatusCode,
        message: String,
        fields: Vec<FieldError>,
    },

    /// Unexpected. Logged in full, never shown to the client.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),

    /// Not a client error at all: the process must stop taking work.
    #[error("shutdown requested: {0}")]
    Shutdown(String),
}

impl Error {
    /// A trusted error the client is allowed to see.
    pub fn validation(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Validation { status, message: message.into(), fields: Vec::new() }
    }

    /// `400 Bad Request` listing the fields that failed.
    pub fn fields(message: impl Into<String>, fields: Vec<FieldError>) -> Self {
        Self::Validation { status: StatusCode::BAD_REQUEST, message: message.into(), fields }
    }

    pub fn internal(cause: impl Into<anyhow::Error>) -> Self {
        Self::Internal(cause.into())
    }

    /// Asks the whole service to stop once this error reaches the [`App`](crate::App).
    pub fn shutdown(reason: impl Into<String>) -> Self {
        Self::Shutdown(reason.into())
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }

    /// Status the client receives, or `None` for [`Error::Shutdown`].
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Validation { status, .. } => Some(*status),
            Self::Internal(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Shutdown(_) => None,
        }
    }

    /// Status and body the client receives, or `None` for [`Error::Shutdown`],
    /// which is never written to the wire.
    pub fn to_response_parts(&self) -> Option<(StatusCode, ErrorResponse)> {
        match self {
            Self::Validation { status, message, fields } => Some((
                *status,
                ErrorResponse { error: message.clone(), fields: fields.clone() },
            )),
            Self::Internal(_) => Some((StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::internal())),
            Self::Shutdown(_) => None,
        }
    }
}
