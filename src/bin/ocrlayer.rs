//! Server binary for ocrlayer.
//!
//! A thin shim over the library crate: loads [`Settings`], applies CLI
//! overrides, starts an [`OcrService`] and serves [`ocrlayer::api::router`]
//! until SIGINT/SIGTERM, then drains in-flight jobs.

use anyhow::{Context, Result};
use clap::Parser;
use ocrlayer::{api, EngineKind, OcrService, Settings};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"CONFIGURATION:
  Settings come from ocrlayer.toml (or --config) overlaid by environment
  variables with the OCRLAYER__ prefix and "__" as the section separator:

    OCRLAYER__SERVER__PORT=9000
    OCRLAYER__OCR__WORKERS=8
    OCRLAYER__OCR__FAILURE_POLICY=best-effort
    OCRLAYER__OCR__SUPPORTED_LANGUAGES=eng,deu,pan

  Flags below override both.

ENDPOINTS:
  POST /v1/jobs?languages=eng+deu      submit a PDF (raw body)
  GET  /v1/jobs/{id}                   status
  GET  /v1/jobs/{id}/result            searchable PDF
  GET  /v1/jobs/{id}/text              text layer as JSON
  POST /v1/jobs/{id}/cancel            cancel
  GET  /health

PREREQUISITES:
  libpdfium must be loadable (system path, ./, or ocr.pdfium_lib_path) and
  the tesseract executable must be on PATH with the needed traineddata.
  --mock-engine needs neither.
"#;

/// Searchable-PDF OCR service.
#[derive(Parser, Debug)]
#[command(
    name = "ocrlayer",
    version,
    about = "Serve an OCR pipeline that turns scanned PDFs into searchable PDFs",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Config file (TOML). Defaults to ./ocrlayer.toml when present.
    #[arg(short, long, env = "OCRLAYER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address.
    #[arg(long, env = "OCRLAYER_HOST")]
    host: Option<String>,

    /// Listen port.
    #[arg(short, long, env = "OCRLAYER_PORT")]
    port: Option<u16>,

    /// Worker pool size.
    #[arg(short, long, env = "OCRLAYER_WORKERS")]
    workers: Option<usize>,

    /// Artifact directory.
    #[arg(long, env = "OCRLAYER_ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,

    /// Use the in-process mock engine instead of pdfium + tesseract.
    #[arg(long, env = "OCRLAYER_MOCK_ENGINE")]
    mock_engine: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "OCRLAYER_JSON_LOGS")]
    json_logs: bool,

    /// Debug-level logs.
    #[arg(short, long, env = "OCRLAYER_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(workers) = cli.workers {
        settings.ocr.workers = workers;
    }
    if let Some(dir) = cli.artifact_dir {
        settings.ocr.artifact_dir = dir;
    }
    if cli.mock_engine {
        settings.ocr.engine = EngineKind::Mock;
    }

    tokio::fs::create_dir_all(&settings.ocr.artifact_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create artifact directory {}",
                settings.ocr.artifact_dir.display()
            )
        })?;

    info!("Starting ocrlayer v{}", env!("CARGO_PKG_VERSION"));
    let service = Arc::new(OcrService::start(settings.ocr).context("Failed to start service")?);
    let app = api::router(Arc::clone(&service));

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let grace = Duration::from_secs(settings.server.shutdown_grace_secs);
    info!(grace_secs = grace.as_secs(), "Draining jobs");
    service.shutdown(grace).await;
    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose {
        "ocrlayer=debug,tower_http=debug"
    } else {
        "ocrlayer=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
