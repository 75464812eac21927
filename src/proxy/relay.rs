//! Per-connection relay
//!
//! One task per client connection. Each exchange on the connection gets a
//! fresh upstream connection: the request head is forwarded as received, the
//! body streamed behind it, and the response relayed back the same way. The
//! proxy only originates bytes when the upstream cannot answer at all.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, timeout_at};

use super::error::GatewayError;
use crate::config::ProxyConfig;
use crate::error::EvalError;
use crate::events::RelayEvent;
use crate::protocol::framing::{
    read_request_head, read_response_head, relay_body, BodyTap, RelayIoError, RequestHead,
    ResponseHead,
};
use crate::util::{body_preview, head_text};

/// Everything a relay needs, shared by all connections
pub struct RelayContext {
    pub upstream: SocketAddr,
    pub config: ProxyConfig,
    pub event_tx: mpsc::Sender<RelayEvent>,
}

impl RelayContext {
    /// Events are diagnostics; a closed receiver never stalls a relay
    async fn emit(&self, event: RelayEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn emit_error(&self, request_id: Option<&str>, message: String, status: Option<u16>) {
        self.emit(RelayEvent::Error {
            request_id: request_id.map(str::to_string),
            timestamp: Utc::now(),
            message,
            status,
        })
        .await;
    }
}

/// What happens to the client connection after an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    KeepAlive,
    Close,
}

/// Relay exchanges on one client connection until either side ends it
pub async fn relay_connection(
    client: TcpStream,
    peer: SocketAddr,
    connection_id: u64,
    ctx: Arc<RelayContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (client_read, mut client_write) = client.into_split();
    let mut client_reader = BufReader::new(client_read);
    let mut exchange = 0u64;

    loop {
        // Idle between exchanges: the only point where shutdown may end the connection
        let has_data = tokio::select! {
            ready = client_reader.fill_buf() => ready.map(|buf| !buf.is_empty()),
            _ = shutdown.wait_for(|stop| *stop) => Ok(false),
        };
        match has_data {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                tracing::debug!("Client {} read failed: {}", peer, e);
                break;
            }
        }

        let head = match read_request_head(&mut client_reader, ctx.config.max_head_bytes).await {
            Ok(Some(head)) => head,
            Ok(None) => break,
            Err(e) => {
                // Malformed framing: close without answering
                tracing::warn!("Client {}: {}", peer, e);
                ctx.emit_error(None, e.to_string(), None).await;
                break;
            }
        };

        exchange += 1;
        let id = format!("{}-{}", connection_id, exchange);
        let next = relay_exchange(&ctx, &id, peer, head, &mut client_reader, &mut client_write).await;
        if next == Next::Close {
            break;
        }
    }

    let _ = client_write.shutdown().await;
    tracing::debug!("Connection {} from {} closed", connection_id, peer);
}

/// Relay one request and its response
async fn relay_exchange<CR, CW>(
    ctx: &RelayContext,
    id: &str,
    peer: SocketAddr,
    request: RequestHead,
    client_reader: &mut CR,
    client_write: &mut CW,
) -> Next
where
    CR: AsyncBufRead + Unpin,
    CW: AsyncWrite + Unpin,
{
    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + ctx.config.exchange_timeout();
    let upstream = ctx.upstream.to_string();
    tracing::debug!("[{}] {}\n{}", id, peer, head_text(&request.raw));

    // Connect lazily, bounded by the connect timeout
    let stream = match timeout(ctx.config.connect_timeout(), TcpStream::connect(ctx.upstream)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let err = GatewayError::Unreachable {
                upstream,
                reason: e.to_string(),
            };
            return answer(ctx, id, client_write, err).await;
        }
        Err(_) => {
            let err = GatewayError::Unreachable {
                upstream,
                reason: format!(
                    "connect timed out after {}ms",
                    ctx.config.connect_timeout_ms
                ),
            };
            return answer(ctx, id, client_write, err).await;
        }
    };
    let (upstream_read, mut upstream_write) = stream.into_split();
    let mut upstream_reader = BufReader::new(upstream_read);

    // Forward the request: head bytes as received, then the body
    let mut request_tap = BodyTap::new(ctx.config.log_body_bytes);
    let forwarded = timeout_at(deadline, async {
        if let Err(e) = upstream_write.write_all(&request.raw).await {
            return Err(RelayIoError::Write(e));
        }
        relay_body(
            &mut *client_reader,
            &mut upstream_write,
            request.framing,
            &mut request_tap,
            Some(ctx.config.idle_timeout()),
        )
        .await
    })
    .await;

    match forwarded {
        Ok(Ok(())) => {}
        Ok(Err(RelayIoError::Read(e))) => {
            // Client went away mid-request; dropping the upstream abandons it
            tracing::debug!("[{}] client aborted request: {}", id, e);
            ctx.emit_error(Some(id), format!("client aborted request: {}", e), None)
                .await;
            return Next::Close;
        }
        Ok(Err(RelayIoError::Write(e))) => {
            let err = GatewayError::Unreachable {
                upstream,
                reason: e.to_string(),
            };
            return answer(ctx, id, client_write, err).await;
        }
        Err(_) => {
            let err = GatewayError::Timeout {
                upstream,
                after: ctx.config.exchange_timeout(),
            };
            return answer(ctx, id, client_write, err).await;
        }
    }

    tracing::trace!(
        "[{}] request body: {}",
        id,
        body_preview(request_tap.preview(), request_tap.total(), ctx.config.log_body_bytes)
    );
    ctx.emit(RelayEvent::Request {
        id: id.to_string(),
        timestamp: Utc::now(),
        client: peer.to_string(),
        method: request.method.clone(),
        path: request.path.clone(),
        head: head_text(&request.raw),
        body_size: request_tap.total(),
        body_preview: body_preview(
            request_tap.preview(),
            request_tap.total(),
            ctx.config.log_body_bytes,
        ),
    })
    .await;

    // Wait for the final response head, forwarding interim ones
    let mut interim_forwarded = false;
    let response = loop {
        let next_head = tokio::select! {
            head = timeout_at(
                deadline,
                read_response_head(&mut upstream_reader, ctx.config.max_head_bytes, &request.method),
            ) => head,
            _ = client_closed(client_reader) => {
                tracing::debug!("[{}] client closed while waiting on upstream", id);
                ctx.emit_error(Some(id), "client closed before response".into(), None).await;
                return Next::Close;
            }
        };

        let head = match next_head {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => {
                let err = GatewayError::Unreachable {
                    upstream,
                    reason: upstream_reason(e),
                };
                return if interim_forwarded {
                    abandon(ctx, id, err).await
                } else {
                    answer(ctx, id, client_write, err).await
                };
            }
            Err(_) => {
                let err = GatewayError::Timeout {
                    upstream,
                    after: ctx.config.exchange_timeout(),
                };
                return if interim_forwarded {
                    abandon(ctx, id, err).await
                } else {
                    answer(ctx, id, client_write, err).await
                };
            }
        };

        if !head.is_interim() {
            break head;
        }
        if let Err(e) = client_write.write_all(&head.raw).await {
            tracing::debug!("[{}] client write failed: {}", id, e);
            return Next::Close;
        }
        interim_forwarded = true;
    };

    forward_response(
        ctx,
        id,
        &request,
        response,
        started,
        &mut upstream_reader,
        client_reader,
        client_write,
    )
    .await
}

/// Stream the final response back to the client
///
/// The body relay gives up when the upstream stalls past the idle timeout or
/// when the client closes its side; either way the upstream is dropped.
#[allow(clippy::too_many_arguments)]
async fn forward_response<UR, CR, CW>(
    ctx: &RelayContext,
    id: &str,
    request: &RequestHead,
    response: ResponseHead,
    started: Instant,
    upstream_reader: &mut UR,
    client_reader: &mut CR,
    client_write: &mut CW,
) -> Next
where
    UR: AsyncBufRead + Unpin,
    CR: AsyncBufRead + Unpin,
    CW: AsyncWrite + Unpin,
{
    tracing::debug!("[{}] upstream answered\n{}", id, head_text(&response.raw));

    if let Err(e) = client_write.write_all(&response.raw).await {
        tracing::debug!("[{}] client write failed: {}", id, e);
        return Next::Close;
    }

    let mut tap = BodyTap::new(ctx.config.log_body_bytes);
    let relayed = tokio::select! {
        relayed = relay_body(
            upstream_reader,
            &mut *client_write,
            response.framing,
            &mut tap,
            Some(ctx.config.idle_timeout()),
        ) => relayed,
        _ = client_closed(client_reader) => {
            tracing::debug!("[{}] client closed mid-response", id);
            ctx.emit_error(Some(id), "client closed mid-response".into(), None).await;
            return Next::Close;
        }
    };
    if let Err(e) = relayed {
        // Part of the response is already with the client; all we can do is close
        let message = match e {
            RelayIoError::Read(e) => format!("upstream failed mid-response: {}", e),
            RelayIoError::Write(e) => format!("client failed mid-response: {}", e),
        };
        tracing::warn!("[{}] {}", id, message);
        ctx.emit_error(Some(id), message, None).await;
        return Next::Close;
    }

    let preview = body_preview(tap.preview(), tap.total(), ctx.config.log_body_bytes);
    tracing::trace!("[{}] response body: {}", id, preview);
    tracing::info!(
        "[{}] {} {} -> {} ({} bytes, {}ms)",
        id,
        request.method,
        request.path,
        response.status,
        tap.total(),
        started.elapsed().as_millis()
    );

    ctx.emit(RelayEvent::Response {
        request_id: id.to_string(),
        timestamp: Utc::now(),
        status: response.status,
        head: head_text(&response.raw),
        body_size: tap.total(),
        body_preview: preview,
        duration: started.elapsed(),
    })
    .await;

    if request.wants_close() || response.wants_close() {
        Next::Close
    } else {
        Next::KeepAlive
    }
}

/// Answer the client with a gateway error and end the connection
async fn answer<CW>(ctx: &RelayContext, id: &str, client_write: &mut CW, err: GatewayError) -> Next
where
    CW: AsyncWrite + Unpin,
{
    let status = err.status().as_u16();
    tracing::warn!("[{}] {} -> {}", id, err, status);

    if let Err(e) = client_write.write_all(&err.to_http()).await {
        tracing::debug!("[{}] could not deliver {}: {}", id, status, e);
    }
    let _ = client_write.flush().await;

    ctx.emit_error(Some(id), err.to_string(), Some(status)).await;
    Next::Close
}

/// Give up on an exchange whose response has already started
async fn abandon(ctx: &RelayContext, id: &str, err: GatewayError) -> Next {
    tracing::warn!("[{}] {} after interim response", id, err);
    ctx.emit_error(Some(id), err.to_string(), None).await;
    Next::Close
}

fn upstream_reason(err: EvalError) -> String {
    match err {
        EvalError::UpstreamUnavailable(reason) | EvalError::Protocol(reason) => reason,
        other => other.to_string(),
    }
}

/// Resolves when the client has closed its side of the connection
///
/// Pipelined bytes from the client are left in the buffer for the next
/// exchange; in that case this never resolves.
async fn client_closed<R>(reader: &mut R)
where
    R: AsyncBufRead + Unpin,
{
    match reader.fill_buf().await {
        Ok(buf) if !buf.is_empty() => std::future::pending().await,
        _ => {}
    }
}
