use std::sync::Arc;

use tracing::{error, warn};

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler, Middleware};
use crate::request::Request;
use crate::response::{Response, respond};

/// Translates errors from the inner chain into responses.
///
/// - [`Error::Validation`]: its status and `{"error", "fields"}` body.
/// - [`Error::Internal`]: logged with the full cause, `500` with a generic body.
/// - [`Error::Shutdown`]: returned unchanged so it reaches the [`App`](crate::App).
pub fn errors() -> impl Middleware {
    |next: BoxedHandler| {
        (move |ctx: Context, req: Request| translate(Arc::clone(&next), ctx, req))
            .into_boxed_handler()
    }
}

async fn translate(next: BoxedHandler, ctx: Context, req: Request) -> Result<Response, Error> {
    let err = match next.call(ctx.clone(), req).await {
        Ok(res) => return Ok(res),
        Err(err) => err,
    };
    let trace_id = ctx.state()?.trace_id();

    match &err {
        Error::Validation { status, message, .. } => {
            warn!(%trace_id, status = status.as_u16(), message = %message, "request rejected");
        }
        Error::Internal(cause) => {
            error!(%trace_id, error = %format!("{cause:#}"), "request failed");
        }
        Error::Shutdown(reason) => {
            warn!(%trace_id, %reason, "handler requested shutdown");
        }
    }

    match err.to_response_parts() {
        Some((status, body)) => respond(&ctx, &body, status),
        None => Err(err),
    }
}
