//! Command-line and environment configuration.
//!
//! Every flag can also be set through its `SALES_*` variable; the flag wins.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::server::ServerConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "sales-api", version, about = "Sales API service")]
pub struct Config {
    /// Address the API listener binds.
    #[arg(long, env = "SALES_WEB_API_HOST", default_value = "0.0.0.0:3000")]
    pub web_api_host: SocketAddr,

    /// Address the debug listener binds.
    #[arg(long, env = "SALES_WEB_DEBUG_HOST", default_value = "0.0.0.0:4000")]
    pub web_debug_host: SocketAddr,

    /// Time allowed to receive request headers.
    #[arg(long, env = "SALES_WEB_READ_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub web_read_timeout: Duration,

    /// Time allowed to produce a response.
    #[arg(long, env = "SALES_WEB_WRITE_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub web_write_timeout: Duration,

    /// Time a keep-alive connection may sit without a request.
    #[arg(long, env = "SALES_WEB_IDLE_TIMEOUT", default_value = "120s", value_parser = parse_duration)]
    pub web_idle_timeout: Duration,

    /// Largest request body accepted, in bytes.
    #[arg(long, env = "SALES_WEB_MAX_BODY_BYTES", default_value_t = 1 << 20)]
    pub web_max_body_bytes: usize,

    /// Time in-flight requests get to finish once shutdown starts.
    #[arg(long, env = "SALES_WEB_SHUTDOWN_TIMEOUT", default_value = "20s", value_parser = parse_duration)]
    pub web_shutdown_timeout: Duration,
}

impl From<&Config> for ServerConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            read_timeout: cfg.web_read_timeout,
            write_timeout: cfg.web_write_timeout,
            idle_timeout: cfg.web_idle_timeout,
            max_body_bytes: cfg.web_max_body_bytes,
        }
    }
}

/// Parses `250ms`, `5s`, `2m`, `1h`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration cannot be empty".to_owned());
    }

    let (num, unit_ms) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 3_600_000)
    } else {
        (s, 1_000)
    };

    let value: u64 = num.parse().map_err(|_| format!("invalid duration: {s}"))?;
    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration out of range: {s}"))
}
