//! AxoUpload server binary.
//!
//! Serves an upload form and accepts files either as a multipart POST or as
//! a chunked WebSocket stream, writing them into a single output directory
//! under collision-safe names.

mod atomic;
mod config;
mod error;
mod frontend;
mod http;
mod logging;
mod multipart;
mod router;
mod sanitize;
mod storage;
mod tls;
mod websocket;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use crate::config::{Args, SHUTDOWN_GRACE_SECS, UploadConfig};
use crate::http::build_cors_layer;
use crate::router::build_router;
use crate::storage::OutputDir;

shadow!(build);

/// Starts the AxoUpload server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();
    logging::init_logging(&args.log_level);

    let output = Arc::new(OutputDir::new(PathBuf::from(&args.out)));
    output.ensure_root().await?;
    let config = Arc::new(UploadConfig::from_args(&args));

    let mut app = build_router(output.clone(), config.clone());
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }
    let service = app.into_make_service_with_connect_info::<SocketAddr>();

    let tls_config = tls::build_rustls_config(&args).await?;
    let handle = Handle::new();

    info!(
        out = ?output.root_path(),
        prefix = config.prefix,
        "serving uploads"
    );
    let server = async {
        match tls_config {
            Some(tls_config) => {
                info!("🔒 Starting HTTPS server at {}", args.listen);
                axum_server::bind_rustls(args.listen, tls_config)
                    .handle(handle.clone())
                    .serve(service)
                    .await
            }
            None => {
                info!("🚀 Starting HTTP server at {}", args.listen);
                axum_server::bind(args.listen)
                    .handle(handle.clone())
                    .serve(service)
                    .await
            }
        }
    };

    tokio::spawn(shutdown_signal(handle.clone()));
    server.await
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
