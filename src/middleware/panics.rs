use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use futures_util::FutureExt;

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler, Middleware};
use crate::request::Request;
use crate::response::Response;

/// Recovers from a panic anywhere inside it, reporting it as
/// [`Error::Internal`] so outer middleware can answer `500`.
pub fn panics() -> impl Middleware {
    |next: BoxedHandler| {
        (move |ctx: Context, req: Request| recover(Arc::clone(&next), ctx, req))
            .into_boxed_handler()
    }
}

async fn recover(next: BoxedHandler, ctx: Context, req: Request) -> Result<Response, Error> {
    AssertUnwindSafe(async move { next.call(ctx, req).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panic_error(payload)))
}

pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned());
    Error::internal(anyhow!("PANIC [{message}]"))
}
