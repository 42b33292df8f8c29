//! Doorstep CLI entry point.
//!
//! Parses command line arguments, loads TOML configuration, initializes
//! tracing, then bootstraps the listeners around a small embedded
//! application. A bootstrap failure is logged and terminates the process
//! with status 1; the library itself never exits.

use std::path::Path;

use async_trait::async_trait;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use doorstep::config::{RawConfig, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};
use doorstep::{bootstrap, DevBuilder, EnvOverrides, Framework};

/// Doorstep: a TLS-aware listener bootstrap for embedded web applications
#[derive(Parser, Debug)]
#[command(name = "doorstep", version, about)]
struct Args {
    /// Path to configuration file (falls back to config/default.toml,
    /// then to built-in defaults)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level filter (e.g., "doorstep=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run the embedded application in development mode
    #[arg(long)]
    dev: bool,
}

/// The application served when doorstep runs standalone.
struct EmbeddedApp {
    dev: bool,
}

impl Framework for EmbeddedApp {
    fn render(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/healthz", get(health))
            .layer(TraceLayer::new_for_http())
    }

    fn is_dev(&self) -> bool {
        self.dev
    }
}

async fn index() -> Html<&'static str> {
    Html("<!DOCTYPE html><html><body><h1>doorstep</h1><p>The listener bootstrap is serving.</p></body></html>")
}

async fn health() -> &'static str {
    "OK"
}

/// The embedded application has no asset pipeline, so its builder has
/// nothing to do.
struct NoopBuilder;

#[async_trait]
impl DevBuilder for NoopBuilder {
    async fn build(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::debug!("Embedded application has no assets to build");
        Ok(())
    }
}

fn load_raw_config(args: &Args) -> Result<RawConfig, doorstep::config::ConfigError> {
    match &args.config {
        Some(path) => RawConfig::load(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => RawConfig::load(DEFAULT_CONFIG_PATH),
        None => Ok(RawConfig::default()),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Config is loaded before tracing so the log format setting can apply.
    let raw = match load_raw_config(&args) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    };

    // Log filter priority: CLI > env > default
    let log_filter = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    if raw.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let env = EnvOverrides::from_process_env();

    let booted = match bootstrap::run(
        |_config| EmbeddedApp { dev: args.dev },
        |_app| NoopBuilder,
        &raw,
        &env,
    )
    .await
    {
        Ok(booted) => booted,
        Err(e) => {
            tracing::error!(error = %e, "Bootstrap failed");
            std::process::exit(1);
        }
    };

    tracing::info!(ports = ?booted.ports().as_vec(), "Bootstrap complete");

    booted.wait().await;
}
