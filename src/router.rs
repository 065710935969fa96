//! The application: radix-tree routing plus the middleware chain.
//!
//! One tree per HTTP method, O(path-length) lookup. Middleware is composed
//! once, at registration, so a request costs one tree walk and one call into
//! a pre-built chain.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{ALLOW, HeaderValue};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use tracing::{error, warn};

use crate::context::{Context, RequestState};
use crate::error::{Error, ErrorResponse};
use crate::handler::{BoxedHandler, BoxedMiddleware, Handler, compose};
use crate::middleware::panic_error;
use crate::request::Request;
use crate::response::{Response, respond};
use crate::shutdown::{ShutdownReason, ShutdownSignal};

/// Methods registered for a path that was requested with another method.
/// Present in the context only while the fallback chain runs.
#[derive(Debug, Clone)]
struct RouteMiss {
    allowed: Vec<Method>,
}

/// The application router.
///
/// Build it once at startup, then hand it to [`Server::spawn`](crate::Server::spawn).
///
/// ```rust,no_run
/// use http::{Method, StatusCode};
/// use sales_api::{App, Context, Error, Middleware, Request, Response, ShutdownSignal, middleware, respond};
///
/// async fn get_user(ctx: Context, req: Request) -> Result<Response, Error> {
///     let id = req.param("id").unwrap_or_default();
///     respond(&ctx, &serde_json::json!({ "id": id }), StatusCode::OK)
/// }
///
/// let app = App::new(
///     ShutdownSignal::new(),
///     vec![middleware::logger().boxed(), middleware::errors().boxed(), middleware::panics().boxed()],
/// )
/// .on(Method::GET, "/v1/users/{id}", get_user);
/// # let _ = app;
/// ```
pub struct App {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    global: Vec<BoxedMiddleware>,
    fallback: BoxedHandler,
    shutdown: ShutdownSignal,
}

impl App {
    /// `global` wraps every route and the not-found fallback, first entry
    /// outermost.
    pub fn new(shutdown: ShutdownSignal, global: Vec<BoxedMiddleware>) -> Self {
        let fallback = compose(route_miss.into_boxed_handler(), &global);
        Self { routes: HashMap::new(), global, fallback, shutdown }
    }

    /// Registers a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route pattern or is already taken for
    /// `method`.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.handle(method, path, handler, Vec::new())
    }

    /// Like [`on`](App::on), with `extra` middleware running inside the global set.
    pub fn handle(
        mut self,
        method: Method,
        path: &str,
        handler: impl Handler,
        extra: Vec<BoxedMiddleware>,
    ) -> Self {
        let chain = compose(compose(handler.into_boxed_handler(), &extra), &self.global);
        self.routes
            .entry(method)
            .or_default()
            .insert(path, chain)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// Handle to the flag this app reports through.
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Runs one request through its chain and produces the single response
    /// for it.
    ///
    /// Returns `Err` only for [`Error::Shutdown`]: the shutdown flag is set and
    /// the connection should be dropped without a response.
    pub async fn dispatch(&self, req: Request) -> Result<Response, Error> {
        self.run(req, None).await
    }

    /// Like [`dispatch`](App::dispatch), but gives up after `limit`. A request
    /// that runs out of time is logged and returns `Err` so the connection is
    /// closed without a response.
    pub async fn dispatch_within(&self, req: Request, limit: Duration) -> Result<Response, Error> {
        self.run(req, Some(limit)).await
    }

    async fn run(&self, mut req: Request, limit: Option<Duration>) -> Result<Response, Error> {
        let state = RequestState::new();
        let mut ctx = Context::new(self.shutdown.clone()).with(state.clone());
        let method = req.method().clone();
        let path = req.path().to_owned();

        let handler = match self.lookup(&method, &path) {
            Some((handler, params)) => {
                req.params = params;
                handler
            }
            None => {
                ctx.insert(RouteMiss { allowed: self.allowed_methods(&path) });
                Arc::clone(&self.fallback)
            }
        };

        let call = AssertUnwindSafe(async move { handler.call(ctx, req).await }).catch_unwind();
        let caught = match limit {
            None => call.await,
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(caught) => caught,
                Err(_) => {
                    warn!(
                        trace_id = %state.trace_id(),
                        %method,
                        %path,
                        ?limit,
                        elapsed = ?state.elapsed(),
                        "write timeout exceeded, closing connection"
                    );
                    return Err(Error::internal(anyhow!("write timeout of {limit:?} exceeded")));
                }
            },
        };
        let outcome = caught.unwrap_or_else(|payload| Err(panic_error(payload)));

        match outcome {
            Ok(res) => {
                state.record_status(res.status_code());
                Ok(res)
            }
            Err(Error::Shutdown(reason)) => {
                warn!(trace_id = %state.trace_id(), %reason, "shutdown requested by handler");
                self.shutdown.request(ShutdownReason::Requested(reason.clone()));
                Err(Error::Shutdown(reason))
            }
            Err(err) => {
                let res = last_resort(&state, err);
                state.record_status(res.status_code());
                Ok(res)
            }
        }
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut allowed: Vec<Method> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.clone())
            .collect();
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        allowed
    }
}

/// Inner handler of the fallback chain: `404`, or `405` when the path exists
/// under other methods.
async fn route_miss(ctx: Context, _req: Request) -> Result<Response, Error> {
    let allowed = ctx.get::<RouteMiss>().map(|m| m.allowed.clone()).unwrap_or_default();
    if allowed.is_empty() {
        return Err(Error::validation(StatusCode::NOT_FOUND, "Not Found"));
    }

    let mut res = respond(
        &ctx,
        &serde_json::json!({ "error": "Method Not Allowed" }),
        StatusCode::METHOD_NOT_ALLOWED,
    )?;
    let list = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
    if let Ok(value) = HeaderValue::from_str(&list) {
        res.headers_mut().insert(ALLOW, value);
    }
    Ok(res)
}

/// Renders an error that escaped the whole chain, with the same status the
/// [`errors`](crate::middleware::errors) middleware would use.
fn last_resort(state: &RequestState, err: Error) -> Response {
    error!(trace_id = %state.trace_id(), error = %format!("{err:#}"), "unhandled error");

    let (status, body) = err
        .to_response_parts()
        .unwrap_or_else(|| (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::internal()));
    let body = serde_json::to_vec(&body)
        .map(Bytes::from)
        .unwrap_or_else(|_| Bytes::from_static(br#"{"error":"Internal Server Error"}"#));

    Response::builder().status(status).json(body)
}

impl Default for App {
    fn default() -> Self {
        Self::new(ShutdownSignal::new(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use http::{HeaderMap, Uri};

    use super::*;
    use crate::handler::Middleware;
    use crate::middleware::{errors, logger, panics};

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    async fn create(ctx: Context, _req: Request) -> Result<Response, Error> {
        respond(&ctx, &serde_json::json!({ "id": "45b5fbd3" }), StatusCode::CREATED)
    }

    async fn broken(_ctx: Context, _req: Request) -> Result<Response, Error> {
        Err(Error::internal(anyhow!("connection refused: db at 10.0.0.5")))
    }

    async fn invalid(_ctx: Context, _req: Request) -> Result<Response, Error> {
        Err(Error::validation(StatusCode::BAD_REQUEST, "email required"))
    }

    async fn boom(_ctx: Context, _req: Request) -> Result<Response, Error> {
        panic!("testing panic")
    }

    async fn stop(_ctx: Context, _req: Request) -> Result<Response, Error> {
        Err(Error::shutdown("integrity check failed"))
    }

    async fn user(ctx: Context, req: Request) -> Result<Response, Error> {
        let id = req.param("id").unwrap_or_default().to_owned();
        respond(&ctx, &serde_json::json!({ "id": id }), StatusCode::OK)
    }

    fn app(shutdown: ShutdownSignal) -> App {
        App::new(shutdown, vec![logger().boxed(), errors().boxed(), panics().boxed()])
            .on(Method::POST, "/users", create)
            .on(Method::GET, "/users/{id}", user)
            .on(Method::GET, "/broken", broken)
            .on(Method::GET, "/invalid", invalid)
            .on(Method::GET, "/boom", boom)
            .on(Method::GET, "/stop", stop)
    }

    fn request(method: Method, path: &'static str) -> Request {
        Request::new(
            method,
            Uri::from_static(path),
            HeaderMap::new(),
            Bytes::new(),
            "10.1.1.1:40000".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn success_logs_the_status_it_responded_with() {
        let logs = Captured::default();
        let _guard = logs.install();

        let res = app(ShutdownSignal::new()).dispatch(request(Method::POST, "/users")).await.unwrap();

        assert_eq!(res.status_code(), StatusCode::CREATED);
        let text = logs.text();
        assert!(text.contains("request started"));
        assert!(text.contains("request completed"));
        assert!(text.contains("status_code=201"), "{text}");
        assert!(text.contains("remote_addr=10.1.1.1:40000"), "{text}");
    }

    #[tokio::test]
    async fn path_params_reach_the_handler() {
        let res = app(ShutdownSignal::new()).dispatch(request(Method::GET, "/users/42")).await.unwrap();
        assert_eq!(res.body(), br#"{"id":"42"}"#);
    }

    #[tokio::test]
    async fn unclassified_error_is_a_generic_500_with_the_cause_logged() {
        let logs = Captured::default();
        let _guard = logs.install();

        let res = app(ShutdownSignal::new()).dispatch(request(Method::GET, "/broken")).await.unwrap();

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), br#"{"error":"Internal Server Error"}"#);
        let text = logs.text();
        assert!(text.contains("connection refused: db at 10.0.0.5"), "{text}");
        assert!(text.contains("status_code=500"), "{text}");
    }

    #[tokio::test]
    async fn validation_error_keeps_its_status_and_message() {
        let res = app(ShutdownSignal::new()).dispatch(request(Method::GET, "/invalid")).await.unwrap();

        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.body(), br#"{"error":"email required"}"#);
    }

    #[tokio::test]
    async fn panic_becomes_500_and_the_app_keeps_serving() {
        let logs = Captured::default();
        let _guard = logs.install();
        let app = app(ShutdownSignal::new());

        let res = app.dispatch(request(Method::GET, "/boom")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), br#"{"error":"Internal Server Error"}"#);
        assert!(logs.text().contains("PANIC [testing panic]"));

        let res = app.dispatch(request(Method::GET, "/users/7")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn panic_without_panics_middleware_is_caught_at_the_boundary() {
        let app = App::new(ShutdownSignal::new(), Vec::new()).on(Method::GET, "/boom", boom);

        let res = app.dispatch(request(Method::GET, "/boom")).await.unwrap();

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), br#"{"error":"Internal Server Error"}"#);
    }

    #[tokio::test]
    async fn shutdown_error_sets_the_flag_and_writes_nothing() {
        let shutdown = ShutdownSignal::new();
        let app = app(shutdown.clone());
        assert!(!app.shutdown_requested());

        let err = app.dispatch(request(Method::GET, "/stop")).await.unwrap_err();

        assert!(err.is_shutdown());
        assert!(app.shutdown_requested());
        assert_eq!(
            shutdown.reason(),
            Some(&ShutdownReason::Requested("integrity check failed".into()))
        );
    }

    #[tokio::test]
    async fn unknown_path_is_404_and_wrong_method_is_405() {
        let app = app(ShutdownSignal::new());

        let res = app.dispatch(request(Method::GET, "/nowhere")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(res.body(), br#"{"error":"Not Found"}"#);

        let res = app.dispatch(request(Method::DELETE, "/users/1")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers()[ALLOW], "GET");
    }

    #[tokio::test]
    async fn per_route_middleware_runs_inside_the_global_set() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mark = |name: &'static str, seen: Arc<Mutex<Vec<&'static str>>>| {
            (move |next: BoxedHandler| {
                let seen = Arc::clone(&seen);
                (move |ctx: Context, req: Request| {
                    let (next, seen) = (Arc::clone(&next), Arc::clone(&seen));
                    async move {
                        seen.lock().unwrap().push(name);
                        next.call(ctx, req).await
                    }
                })
                .into_boxed_handler()
            })
            .boxed()
        };

        let app = App::new(ShutdownSignal::new(), vec![mark("global", Arc::clone(&seen))])
            .handle(Method::GET, "/users/{id}", user, vec![mark("route", Arc::clone(&seen))]);
        app.dispatch(request(Method::GET, "/users/1")).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), ["global", "route"]);
    }

    #[tokio::test]
    async fn every_request_gets_its_own_trace_id() {
        let ids = Arc::new(Mutex::new(Vec::new()));
        let app = {
            let ids = Arc::clone(&ids);
            App::default().on(Method::GET, "/", move |ctx: Context, _req: Request| {
                let ids = Arc::clone(&ids);
                async move {
                    ids.lock().unwrap().push(ctx.state()?.trace_id());
                    Ok::<_, Error>(StatusCode::NO_CONTENT)
                }
            })
        };

        app.dispatch(request(Method::GET, "/")).await.unwrap();
        app.dispatch(request(Method::GET, "/")).await.unwrap();

        let ids = ids.lock().unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    fn logged_status(text: &str) -> Option<&str> {
        let line = text.lines().find(|l| l.contains("request completed"))?;
        let start = line.find("status_code=")? + "status_code=".len();
        line[start..].split_whitespace().next()
    }

    #[tokio::test]
    async fn discarded_response_is_not_what_gets_logged() {
        async fn respond_then_fail(ctx: Context, _req: Request) -> Result<Response, Error> {
            let _created = respond(&ctx, &serde_json::json!({ "id": 1 }), StatusCode::CREATED)?;
            Err(Error::internal(anyhow!("commit failed after insert")))
        }

        let logs = Captured::default();
        let _guard = logs.install();
        let app = App::new(ShutdownSignal::new(), vec![logger().boxed(), errors().boxed(), panics().boxed()])
            .on(Method::POST, "/orders", respond_then_fail);

        let res = app.dispatch(request(Method::POST, "/orders")).await.unwrap();

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), br#"{"error":"Internal Server Error"}"#);
        assert_eq!(logged_status(&logs.text()), Some("500"), "{}", logs.text());
    }

    #[tokio::test]
    async fn bare_status_return_is_logged_with_its_status() {
        let logs = Captured::default();
        let _guard = logs.install();
        let app = App::new(ShutdownSignal::new(), vec![logger().boxed()]).on(
            Method::DELETE,
            "/users/{id}",
            |_ctx: Context, _req: Request| async { Ok::<_, Error>(StatusCode::NO_CONTENT) },
        );

        let res = app.dispatch(request(Method::DELETE, "/users/9")).await.unwrap();

        assert_eq!(res.status_code(), StatusCode::NO_CONTENT);
        assert_eq!(logged_status(&logs.text()), Some("204"), "{}", logs.text());
        assert!(!logs.text().contains("status_code=0"));
    }

    #[tokio::test]
    async fn error_rendered_at_the_boundary_is_logged_with_its_status() {
        let logs = Captured::default();
        let _guard = logs.install();
        let app = App::new(ShutdownSignal::new(), vec![logger().boxed()]).on(Method::GET, "/invalid", invalid);

        let res = app.dispatch(request(Method::GET, "/invalid")).await.unwrap();

        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.body(), br#"{"error":"email required"}"#);
        assert_eq!(logged_status(&logs.text()), Some("400"), "{}", logs.text());
    }

    #[tokio::test]
    async fn shutdown_is_logged_without_a_status() {
        let logs = Captured::default();
        let _guard = logs.install();

        app(ShutdownSignal::new()).dispatch(request(Method::GET, "/stop")).await.unwrap_err();

        let text = logs.text();
        assert!(text.contains("request closed without response"), "{text}");
        assert_eq!(logged_status(&text), None);
    }

    #[tokio::test(start_paused = true)]
    async fn write_deadline_is_logged_with_the_trace_id() {
        let logs = Captured::default();
        let _guard = logs.install();
        let app = App::default().on(Method::GET, "/slow", |ctx: Context, _req: Request| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            respond(&ctx, "late", StatusCode::OK)
        });

        let err = app
            .dispatch_within(request(Method::GET, "/slow"), Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Internal(_)));
        let text = logs.text();
        let line = text.lines().find(|l| l.contains("write timeout exceeded")).expect(&text);
        assert!(line.contains("trace_id="), "{line}");
        assert!(line.contains("path=/slow"), "{line}");
    }
}
