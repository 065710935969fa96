//! Debug listener routes: process variables and Kubernetes probes.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/debug/liveness` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/debug/readiness` | Should it get traffic? `503` once draining. |
//! | Vars | `/debug/vars` | Build, pid, start time, uptime, runtime workers. |

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use http::{Method, StatusCode};
use serde::Serialize;

use crate::context::Context;
use crate::error::Error;
use crate::handler::Middleware;
use crate::middleware::{errors, panics};
use crate::request::Request;
use crate::response::{Response, respond};
use crate::router::App;
use crate::shutdown::ShutdownSignal;

struct Process {
    build: &'static str,
    started_at: DateTime<Utc>,
    started: Instant,
}

#[derive(Serialize)]
struct Vars {
    build: &'static str,
    pid: u32,
    started_at: DateTime<Utc>,
    uptime_secs: u64,
    workers: usize,
}

/// Routes served on `--web-debug-host`. Readiness reads `shutdown`.
pub fn debug_mux(shutdown: ShutdownSignal, build: &'static str) -> App {
    let process = Arc::new(Process { build, started_at: Utc::now(), started: Instant::now() });

    let app = App::new(shutdown, vec![errors().boxed(), panics().boxed()]);
    let app = {
        let process = Arc::clone(&process);
        app.on(Method::GET, "/debug/vars", move |ctx: Context, _req: Request| {
            vars(Arc::clone(&process), ctx)
        })
    };
    app.on(Method::GET, "/debug/liveness", move |ctx: Context, _req: Request| {
        liveness(process.build, ctx)
    })
    .on(Method::GET, "/debug/readiness", readiness)
}

async fn vars(process: Arc<Process>, ctx: Context) -> Result<Response, Error> {
    let vars = Vars {
        build: process.build,
        pid: std::process::id(),
        started_at: process.started_at,
        uptime_secs: process.started.elapsed().as_secs(),
        workers: tokio::runtime::Handle::current().metrics().num_workers(),
    };
    respond(&ctx, &vars, StatusCode::OK)
}

async fn liveness(build: &'static str, ctx: Context) -> Result<Response, Error> {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unavailable".to_owned());
    respond(
        &ctx,
        &serde_json::json!({ "status": "up", "build": build, "host": host }),
        StatusCode::OK,
    )
}

async fn readiness(ctx: Context, _req: Request) -> Result<Response, Error> {
    if ctx.shutdown().is_requested() {
        return respond(
            &ctx,
            &serde_json::json!({ "status": "shutting down" }),
            StatusCode::SERVICE_UNAVAILABLE,
        );
    }
    respond(&ctx, &serde_json::json!({ "status": "ok" }), StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{HeaderMap, Uri};

    use super::*;
    use crate::shutdown::ShutdownReason;

    fn get(path: &'static str) -> Request {
        Request::new(Method::GET, Uri::from_static(path), HeaderMap::new(), Bytes::new(), "127.0.0.1:9".parse().unwrap())
    }

    #[tokio::test]
    async fn readiness_fails_once_shutdown_is_requested() {
        let shutdown = ShutdownSignal::new();
        let app = debug_mux(shutdown.clone(), "test");

        let res = app.dispatch(get("/debug/readiness")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::OK);

        shutdown.request(ShutdownReason::Signal("SIGTERM"));
        let res = app.dispatch(get("/debug/readiness")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn vars_and_liveness_report_the_build() {
        let app = debug_mux(ShutdownSignal::new(), "1.2.3");

        let res = app.dispatch(get("/debug/vars")).await.unwrap();
        let vars: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(vars["build"], "1.2.3");
        assert_eq!(vars["pid"], std::process::id());
        assert!(vars["workers"].as_u64().unwrap() >= 1);

        let res = app.dispatch(get("/debug/liveness")).await.unwrap();
        let live: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(live["status"], "up");
        assert_eq!(live["build"], "1.2.3");
    }
}
