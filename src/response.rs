//! Outgoing HTTP response type, the [`IntoResponse`] conversion trait and the
//! [`respond`] function handlers finish with.

use anyhow::Context as _;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use serde::Serialize;

use crate::context::Context;
use crate::error::Error;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

// ── respond ──────────────────────────────────────────────────────────────────

/// Serializes `value` as JSON with `status`.
///
/// `204 No Content` is sent without a body whatever `value` is. The status is
/// recorded in the request's [`RequestState`](crate::RequestState) once this
/// response is the one the request ends with, so a response that is built and
/// then discarded in favour of an error is never logged.
///
/// ```rust,no_run
/// use http::StatusCode;
/// use sales_api::{Context, Error, Request, Response, respond};
///
/// async fn status(ctx: Context, _req: Request) -> Result<Response, Error> {
///     respond(&ctx, &serde_json::json!({ "status": "OK" }), StatusCode::OK)
/// }
/// ```
pub fn respond<T>(ctx: &Context, value: &T, status: StatusCode) -> Result<Response, Error>
where
    T: Serialize + ?Sized,
{
    ctx.state()?;

    if status == StatusCode::NO_CONTENT {
        return Ok(Response::status(status));
    }
    let body = serde_json::to_vec(value).context("serializing response body")?;
    Ok(Response::builder().status(status).json(body))
}

/// Status the client gets for a chain outcome: the response's own, or the
/// one the [`App`](crate::App) renders the error with. `None` when the
/// connection is closed without a response.
pub(crate) fn outcome_status(outcome: &Result<Response, Error>) -> Option<StatusCode> {
    match outcome {
        Ok(res) => Some(res.status_code()),
        Err(err) => err.status_code(),
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use http::StatusCode;
/// use sales_api::Response;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Response {
    /// `200 OK`, `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { status: code, headers: HeaderMap::new(), body: Bytes::new() }
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { status: StatusCode::OK, headers: HeaderMap::new() }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

// ── ResponseBuilder ──────────────────────────────────────────────────────────

/// Fluent builder for [`Response`]. Defaults to `200 OK`.
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(JSON, body.into())
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(TEXT, Bytes::from(body.into()))
    }

    /// Terminate with no body (e.g. `204 No Content`).
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Bytes::new() }
    }

    fn finish(mut self, content_type: &'static str, body: Bytes) -> Response {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Response { status: self.status, headers: self.headers, body }
    }
}

// ── IntoResponse ─────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Handlers that go through [`respond`] return `Response`; the other impls
/// exist for probes and fixed answers that need no status bookkeeping.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}
