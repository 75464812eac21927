// Proxy module - diagnostic relay in front of the evaluation service
//
// Listens on a local port and forwards every exchange to the upstream service
// without altering a byte, while reporting what it saw as RelayEvents. Unlike
// the service this is a raw TCP relay rather than an axum server: re-encoding
// through an HTTP stack would normalize headers and break byte fidelity.
//
// Each accepted connection is its own task. On shutdown the listener closes,
// idle connections are told to end, and in-flight exchanges run to completion.

mod error;
mod relay;

pub use error::GatewayError;
pub use relay::RelayContext;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::config::ProxyConfig;
use crate::events::RelayEvent;

/// Bind the proxy and relay until `shutdown` resolves
pub async fn start_proxy(
    bind_addr: SocketAddr,
    upstream: SocketAddr,
    config: ProxyConfig,
    event_tx: mpsc::Sender<RelayEvent>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind proxy to {}", bind_addr))?;

    tracing::info!("Proxy listening on {}, forwarding to {}", bind_addr, upstream);
    serve(listener, upstream, config, event_tx, shutdown).await
}

/// Relay connections accepted on an already bound listener
pub async fn serve(
    listener: TcpListener,
    upstream: SocketAddr,
    config: ProxyConfig,
    event_tx: mpsc::Sender<RelayEvent>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let ctx = Arc::new(RelayContext {
        upstream,
        config,
        event_tx,
    });
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut relays = JoinSet::new();
    let mut connection_id = 0u64;

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connection_id += 1;
                    tracing::debug!("Connection {} from {}", connection_id, peer);
                    relays.spawn(relay::relay_connection(
                        stream,
                        peer,
                        connection_id,
                        ctx.clone(),
                        stop_rx.clone(),
                    ));
                }
                Err(e) => {
                    // Usually descriptor exhaustion; back off instead of spinning
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },

            Some(joined) = relays.join_next(), if !relays.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Relay task failed: {}", e);
                }
            }
        }
    }

    // Stop accepting, then let in-flight exchanges finish
    drop(listener);
    let _ = stop_tx.send(true);

    if !relays.is_empty() {
        tracing::info!("Waiting for {} open connection(s) to finish", relays.len());
    }
    while let Some(joined) = relays.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Relay task failed: {}", e);
        }
    }

    tracing::info!("Proxy shut down gracefully");
    Ok(())
}
