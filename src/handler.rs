//! Handler and middleware traits, and how both are type-erased.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in one table, so each is
//! hidden behind a trait object:
//!
//! ```text
//! async fn get_user(ctx: Context, req: Request) -> Result<Response, Error>   ← user writes this
//!        ↓ app.on(Method::GET, "/users/{id}", get_user)
//! get_user.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(get_user))                       ← stored as BoxedHandler
//!        ↓
//! handler.call(ctx, req)  at request time             ← one vtable dispatch
//! ```
//!
//! # Middleware
//!
//! A [`Middleware`] turns one [`BoxedHandler`] into another. Any
//! `Fn(BoxedHandler) -> BoxedHandler` closure is one. [`compose`] wraps a
//! handler in a list of middleware so that the first entry runs first on the
//! way in and last on the way out:
//!
//! ```text
//! compose(H, [A, B])   →   A-pre  B-pre  H  B-post  A-post
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Erased types ─────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future that resolves to a handler outcome.
pub type BoxFuture = Pin<Box<dyn Future<Output = Result<Response, Error>> + Send + 'static>>;

/// Dispatch interface behind [`BoxedHandler`].
pub trait ErasedHandler {
    fn call(&self, ctx: Context, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests. Middleware
/// receives the next handler in the chain as one of these.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Handler ──────────────────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any function or
/// closure shaped like
///
/// ```text
/// async fn name(ctx: Context, req: Request) -> Result<impl IntoResponse, Error>
/// ```
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Newtype bridging a concrete handler `F` to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Context, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, ctx: Context, req: Request) -> BoxFuture {
        let fut = (self.0)(ctx, req);
        Box::pin(async move { fut.await.map(IntoResponse::into_response) })
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Wraps a handler to add cross-cutting behaviour.
///
/// A middleware may run code before and after calling `next`, or return an
/// error without calling it at all.
///
/// ```rust
/// use sales_api::{BoxedHandler, Context, Error, Handler, Middleware, Request};
///
/// fn tag() -> impl Middleware {
///     |next: BoxedHandler| {
///         (move |ctx: Context, req: Request| {
///             let next = next.clone();
///             async move {
///                 let mut res = next.call(ctx, req).await?;
///                 res.headers_mut().insert("x-tag", "1".parse().unwrap());
///                 Ok::<_, Error>(res)
///             }
///         })
///         .into_boxed_handler()
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;

    fn boxed(self) -> BoxedMiddleware
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

impl<F> Middleware for F
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Wraps `handler` in `middleware`, first entry outermost.
pub fn compose(handler: BoxedHandler, middleware: &[BoxedMiddleware]) -> BoxedHandler {
    middleware.iter().rev().fold(handler, |next, mw| mw.wrap(next))
}
