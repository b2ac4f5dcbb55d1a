//! intercept-proxy
//!
//! Runs the interception engine as a standalone process.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::listener ──▶ http::framing ──▶ intercept (request hooks)
//!                                                         │
//!                                                         ▼
//!     Client ◀── http::framing ◀── intercept ◀──── http::upstream ◀──▶ Origin
//!                                 (response hooks)
//!
//!     Cross-cutting: config, observability, resilience, lifecycle, registrar
//! ```

use std::path::PathBuf;

use clap::Parser;

use intercept_proxy::config::{load_config, ProxyConfig, ProxyMode};
use intercept_proxy::lifecycle::{signals, startup};
use intercept_proxy::{InterceptorModes, LoggingHook, ProxyEngine};

/// Transparent HTTP/HTTPS interception proxy.
#[derive(Debug, Parser)]
#[command(name = "intercept-proxy", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// Only register the proxy for plain HTTP.
    #[arg(long, conflicts_with = "https_only")]
    http_only: bool,

    /// Only register the proxy for HTTPS.
    #[arg(long)]
    https_only: bool,

    /// Log every intercepted request and response.
    #[arg(long)]
    log_hooks: bool,
}

impl Cli {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if self.http_only {
            config.listener.modes = vec![ProxyMode::Http];
        } else if self.https_only {
            config.listener.modes = vec![ProxyMode::Https];
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);

    startup::init_observability(&config);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        "intercept-proxy starting"
    );

    let engine = ProxyEngine::from_config(&config)?;
    if cli.log_hooks {
        engine.events().on_request(LoggingHook);
        engine.events().on_response(LoggingHook);
    }

    let modes: InterceptorModes = config.listener.modes.iter().copied().collect();
    let addr = engine.start_with_modes(config.listener.port, modes).await?;
    tracing::info!(address = %addr, "Listening for connections");

    signals::wait_for_shutdown_signal().await;

    engine.stop().await;
    let drain = config.timeouts.drain();
    if !engine.wait_idle(drain).await {
        tracing::warn!(
            in_flight = engine.in_flight(),
            drain_secs = drain.as_secs(),
            "Drain deadline passed with transactions still running"
        );
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
