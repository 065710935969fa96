use std::process::ExitCode;

use clap::Parser;
use tracing::Instrument;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use sales_api::config::Config;
use sales_api::lifecycle;

const SERVICE: &str = "SALES-API";

#[tokio::main]
async fn main() -> ExitCode {
    // `--help` and `--version` exit 0, bad flags exit 2.
    let cfg = Config::try_parse().unwrap_or_else(|e| e.exit());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sales_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(service = SERVICE, "logger initialized");

    let run = lifecycle::run(cfg).instrument(tracing::info_span!("service", service = SERVICE));
    match run.await {
        Ok(()) => {
            tracing::info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let stage = e.stage();
            tracing::error!(stage, error = %format!("{:#}", anyhow::Error::new(e)), "{stage} failed");
            ExitCode::FAILURE
        }
    }
}
