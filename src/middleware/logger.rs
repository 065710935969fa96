use std::sync::Arc;

use tracing::info;

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler, Middleware};
use crate::request::Request;
use crate::response::{Response, outcome_status};

/// Logs one line when a request arrives and one when it completes.
///
/// Once the inner chain has returned, the status its outcome is sent with is
/// recorded in the [`RequestState`](crate::RequestState) and logged with the
/// time since arrival. An outcome sent with no response at all (a shutdown
/// request) is logged without a status.
pub fn logger() -> impl Middleware {
    |next: BoxedHandler| {
        (move |ctx: Context, req: Request| log_request(Arc::clone(&next), ctx, req))
            .into_boxed_handler()
    }
}

async fn log_request(next: BoxedHandler, ctx: Context, req: Request) -> Result<Response, Error> {
    let state = ctx.state()?.clone();
    let method = req.method().clone();
    let path = req.path().to_owned();
    let remote_addr = req.remote_addr();

    info!(
        trace_id = %state.trace_id(),
        %method,
        %path,
        %remote_addr,
        "request started"
    );

    let result = next.call(ctx, req).await;
    if let Some(status) = outcome_status(&result) {
        state.record_status(status);
    }

    match state.status_code() {
        Some(status) => info!(
            trace_id = %state.trace_id(),
            %method,
            %path,
            %remote_addr,
            status_code = status.as_u16(),
            elapsed = ?state.elapsed(),
            "request completed"
        ),
        None => info!(
            trace_id = %state.trace_id(),
            %method,
            %path,
            %remote_addr,
            elapsed = ?state.elapsed(),
            "request closed without response"
        ),
    }

    result
}
