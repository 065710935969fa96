//! # sales-api
//!
//! Request lifecycle and graceful shutdown for a JSON HTTP service.
//!
//! ## Pieces
//!
//! - [`App`]: radix-tree routing via [`matchit`] with a composed middleware
//!   chain per route.
//! - [`Handler`] / [`Middleware`]: `async fn(Context, Request) -> Result<Response, Error>`
//!   and `Fn(BoxedHandler) -> BoxedHandler`.
//! - [`respond`]: serializes a JSON body with its status. The status a request
//!   ends with is recorded once and logged by [`middleware::logger`].
//! - [`Error`]: validation, internal or shutdown; translated to JSON by
//!   [`middleware::errors`].
//! - [`Server`]: hyper listener with read, write and idle timeouts and a
//!   bounded drain.
//! - [`lifecycle`]: the `Starting → Serving → Draining → Stopped` process
//!   state machine.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::{Method, StatusCode};
//! use sales_api::{App, Context, Error, Middleware, Request, Response, Server, ShutdownSignal};
//! use sales_api::{lifecycle::{Orchestrator, shutdown_signals}, middleware, respond};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let shutdown = ShutdownSignal::new();
//!     let app = App::new(
//!         shutdown.clone(),
//!         vec![middleware::logger().boxed(), middleware::errors().boxed(), middleware::panics().boxed()],
//!     )
//!     .on(Method::POST, "/users", create_user);
//!
//!     let server = Server::bind("0.0.0.0:3000".parse()?, Default::default()).await?;
//!     Orchestrator::new(shutdown, Duration::from_secs(20))
//!         .run(server, app, shutdown_signals()?)
//!         .await?;
//!     Ok(())
//! }
//!
//! async fn create_user(ctx: Context, req: Request) -> Result<Response, Error> {
//!     let user: serde_json::Value = req.json()?;
//!     if user.get("email").is_none() {
//!         return Err(Error::validation(StatusCode::BAD_REQUEST, "email required"));
//!     }
//!     respond(&ctx, &user, StatusCode::CREATED)
//! }
//! ```

pub mod config;
pub mod debug;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;

mod context;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;
mod shutdown;

pub use context::{Claims, Context, RequestState};
pub use error::{Error, ErrorResponse, FieldError};
pub use handler::{BoxFuture, BoxedHandler, BoxedMiddleware, ErasedHandler, Handler, Middleware, compose};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder, respond};
pub use router::App;
pub use server::{DrainTimeout, Server, ServerConfig, ServerHandle};
pub use shutdown::{ShutdownReason, ShutdownSignal};
