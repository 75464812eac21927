// Service module - the evaluation HTTP service
//
// Every endpoint lives under /v0/ and is served by one dispatch handler that
// decodes the request into a typed Command. The router is built separately
// from the listener so tests can drive it in-process.

mod handlers;
mod state;

pub use handlers::execute;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{routing::any, Router};
use tokio::net::{TcpListener, TcpSocket};

use crate::config::Config;

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v0/:endpoint", any(handlers::dispatch))
        .fallback(handlers::not_found)
        .with_state(state)
}

/// Bind the configured address with the configured listen backlog
pub fn bind(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .context("Failed to create socket")?;

    socket
        .set_reuseaddr(true)
        .context("Failed to set SO_REUSEADDR")?;
    socket
        .bind(addr)
        .with_context(|| format!("Failed to bind to {}", addr))?;
    socket
        .listen(backlog)
        .with_context(|| format!("Failed to listen on {}", addr))
}

/// Start the service on the configured address and run until `shutdown` resolves
pub async fn start_service(
    config: &Config,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = bind(config.bind_addr, config.backlog)?;
    tracing::info!(
        "Evaluation service listening on {} (backlog {})",
        config.bind_addr,
        config.backlog
    );
    serve(listener, state, shutdown).await
}

/// Serve on an already bound listener
///
/// When `shutdown` resolves the server stops accepting connections and
/// finishes requests already in progress.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    tracing::info!("Evaluation service shut down gracefully");
    Ok(())
}
