//! Built-in middleware.
//!
//! The service wires the global set in this order, outermost first:
//!
//! ```text
//! logger → errors → panics → [per-route middleware] → handler
//! ```
//!
//! `logger` sits outside `errors` so the status it logs is the one actually
//! sent, including error responses. `panics` sits inside `errors` so a
//! recovered panic is translated like any other internal error.
//!
//! | Middleware | Purpose |
//! |---|---|
//! | [`logger`] | request started / completed lines with trace id, status, latency |
//! | [`errors`] | turns [`Error`](crate::Error) values into JSON error responses |
//! | [`panics`] | converts a panic into [`Error::Internal`](crate::Error::Internal) |
//! | [`reject_when_draining`] | `503` for new work once shutdown was requested |
//! | [`Cors`] | CORS response headers and preflight answers |

mod cors;
mod drain;
mod errors;
mod logger;
mod panics;

pub use cors::{AllowedOrigins, Cors, CorsConfig};
pub use drain::reject_when_draining;
pub use errors::errors;
pub use logger::logger;
pub use panics::panics;

pub(crate) use panics::panic_error;
