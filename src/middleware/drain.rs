use std::sync::Arc;

use http::StatusCode;

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler, Middleware};
use crate::request::Request;

/// Refuses new work with `503 Service Unavailable` once shutdown has been
/// requested. Requests already past this point keep running.
pub fn reject_when_draining() -> impl Middleware {
    |next: BoxedHandler| {
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            async move {
                if ctx.shutdown().is_requested() {
                    return Err(Error::validation(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "service is shutting down",
                    ));
                }
                next.call(ctx, req).await
            }
        })
        .into_boxed_handler()
    }
}
