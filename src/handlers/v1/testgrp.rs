//! Development check handler.

use http::StatusCode;
use serde::Serialize;

use crate::context::Context;
use crate::error::Error;
use crate::request::Request;
use crate::response::{Response, respond};

#[derive(Serialize)]
struct Status {
    status: &'static str,
}

pub async fn test(ctx: Context, _req: Request) -> Result<Response, Error> {
    respond(&ctx, &Status { status: "OK" }, StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{HeaderMap, Method, Uri};

    use crate::handlers::{ApiMuxConfig, api_mux};
    use crate::request::Request;
    use crate::shutdown::{ShutdownReason, ShutdownSignal};

    fn get() -> Request {
        Request::new(Method::GET, Uri::from_static("/v1/test"), HeaderMap::new(), Bytes::new(), "127.0.0.1:9".parse().unwrap())
    }

    #[tokio::test]
    async fn answers_ok() {
        let res = api_mux(ApiMuxConfig::default()).dispatch(get()).await.unwrap();

        assert_eq!(res.status_code(), http::StatusCode::OK);
        assert_eq!(res.body(), br#"{"status":"OK"}"#);
    }

    #[tokio::test]
    async fn refuses_new_work_while_draining() {
        let shutdown = ShutdownSignal::new();
        let app = api_mux(ApiMuxConfig { shutdown: shutdown.clone(), ..Default::default() });
        shutdown.request(ShutdownReason::Signal("SIGTERM"));

        let res = app.dispatch(get()).await.unwrap();

        assert_eq!(res.status_code(), http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.body(), br#"{"error":"service is shutting down"}"#);
    }
}
