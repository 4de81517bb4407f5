//! Toolhost Server
//!
//! Serves the tool orchestration API for the desktop UI. The bound address is
//! announced on stdout as `TOOLHOST_URL=...` so a launcher can discover it.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use toolhost_server::{api, check_dependencies, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::load()?);

    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    // Logs go to stderr; stdout carries the URL announcement.
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    let http_addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse()?;
    info!("Starting Toolhost Server");

    let state = AppState::new(config.clone());

    let startup = state.clone();
    tokio::spawn(async move {
        check_dependencies(&startup).await;
    });

    let app = api::http::create_router(state);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    let local_addr = listener.local_addr()?;
    info!("HTTP listening on {}", local_addr);

    let mut stdout = std::io::stdout();
    writeln!(stdout, "TOOLHOST_URL=http://{}", local_addr)?;
    stdout.flush()?;

    let result = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = result {
        error!("HTTP server error: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Received shutdown signal");
}
