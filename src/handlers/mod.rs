//! Route table of the API listener.

use http::Method;

use crate::handler::Middleware;
use crate::middleware::{Cors, CorsConfig, errors, logger, panics, reject_when_draining};
use crate::router::App;
use crate::shutdown::ShutdownSignal;

pub mod v1;

/// What the API routes need from the process.
#[derive(Debug, Clone, Default)]
pub struct ApiMuxConfig {
    pub shutdown: ShutdownSignal,
    pub cors: CorsConfig,
}

/// Builds the API application with the standard global middleware.
pub fn api_mux(cfg: ApiMuxConfig) -> App {
    let global = vec![
        logger().boxed(),
        Cors::new(cfg.cors).boxed(),
        errors().boxed(),
        panics().boxed(),
        reject_when_draining().boxed(),
    ];

    App::new(cfg.shutdown, global).on(Method::GET, "/v1/test", v1::testgrp::test)
}
