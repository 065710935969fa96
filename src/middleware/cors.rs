use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler, Middleware};
use crate::request::Request;
use crate::response::{Response, respond};

/// Which `Origin`s may read responses.
#[derive(Debug, Clone)]
pub enum AllowedOrigins {
    Any,
    List(BTreeSet<String>),
}

impl AllowedOrigins {
    fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.contains(origin),
        }
    }
}

/// CORS policy.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: AllowedOrigins,
    pub allowed_methods: Vec<Method>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// How long browsers may cache a preflight answer.
    pub max_age: Option<Duration>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: AllowedOrigins::Any,
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allowed_headers: vec![
                "accept".into(),
                "authorization".into(),
                "content-type".into(),
            ],
            allow_credentials: false,
            max_age: Some(Duration::from_secs(86_400)),
        }
    }
}

impl CorsConfig {
    /// Only the listed origins, credentials allowed.
    pub fn strict(origins: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_origins: AllowedOrigins::List(origins.into_iter().collect()),
            allow_credentials: true,
            max_age: Some(Duration::from_secs(3_600)),
            ..Self::default()
        }
    }
}

/// CORS middleware.
///
/// Preflight requests (`OPTIONS` carrying `Access-Control-Request-Method`) are
/// answered with `204` here and never reach the handler. Install it globally
/// so preflights to paths that have no `OPTIONS` route are covered too.
#[derive(Debug, Clone)]
pub struct Cors {
    config: Arc<CorsConfig>,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        Self { config: Arc::new(config) }
    }
}

impl Middleware for Cors {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let config = Arc::clone(&self.config);
        (move |ctx: Context, req: Request| {
            apply(Arc::clone(&config), Arc::clone(&next), ctx, req)
        })
        .into_boxed_handler()
    }
}

async fn apply(
    config: Arc<CorsConfig>,
    next: BoxedHandler,
    ctx: Context,
    req: Request,
) -> Result<Response, Error> {
    let origin = req.header(header::ORIGIN.as_str()).map(str::to_owned);
    let preflight = req.method() == Method::OPTIONS
        && req.headers().contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut res = if preflight {
        let mut res = respond(&ctx, &(), StatusCode::NO_CONTENT)?;
        if origin.as_deref().is_some_and(|o| config.allowed_origins.allows(o)) {
            preflight_headers(res.headers_mut(), &config);
        }
        res
    } else {
        next.call(ctx, req).await?
    };

    if let Some(origin) = origin.as_deref() {
        cors_headers(res.headers_mut(), &config, origin);
    }
    Ok(res)
}

fn cors_headers(headers: &mut HeaderMap, config: &CorsConfig, origin: &str) {
    if !config.allowed_origins.allows(origin) {
        return;
    }

    match &config.allowed_origins {
        AllowedOrigins::Any if !config.allow_credentials => {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
        _ => {
            // Echoing the origin is required with credentials; caches must key on it.
            if let Ok(value) = HeaderValue::from_str(origin) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
                headers.append(header::VARY, HeaderValue::from_static("origin"));
            }
        }
    }

    if config.allow_credentials {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
}

fn preflight_headers(headers: &mut HeaderMap, config: &CorsConfig) {
    let methods = config.allowed_methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
    if let Ok(value) = HeaderValue::from_str(&methods) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, value);
    }
    if let Ok(value) = HeaderValue::from_str(&config.allowed_headers.join(", ")) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, value);
    }
    if let Some(max_age) = config.max_age {
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age.as_secs()));
    }
}
