//! WebSocket transport.
//!
//! One inbound loop per socket processes frames strictly in order; one
//! outbound pump drains the connection's mailbox to the socket. Either side
//! ending (read error, close frame, full mailbox) tears the connection down.

use crate::server::{Relay, RelayMetrics};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::ConnectInfo;
use axum::http::{header::ORIGIN, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures_util::{SinkExt, StreamExt};
use parch_types::Frame;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Upgrade handler for `GET /ws`.
///
/// Upgrades are throttled per source address. A connection may become a
/// host author only if it did not come from a browser (no `Origin`
/// header), unless the relay is configured to allow browser authors.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Extension(relay): Extension<Arc<Relay>>,
) -> Response {
    let ip = addr.ip();
    if let Err(e) = relay.rate_limits().check_connection(ip) {
        RelayMetrics::incr(&relay.metrics().rate_limit_hits);
        tracing::warn!(%ip, "WebSocket upgrade rejected: {}", e);
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let author_eligible =
        relay.config().server.allow_browser_authors || !headers.contains_key(ORIGIN);
    let max_frame = relay.config().limits.max_frame_bytes;
    ws.max_message_size(max_frame)
        .max_frame_size(max_frame)
        .on_upgrade(move |socket| serve_socket(socket, relay, ip, author_eligible))
        .into_response()
}

async fn serve_socket(socket: WebSocket, relay: Arc<Relay>, ip: IpAddr, author_eligible: bool) {
    let (mut conn, mut outbound) = relay.open_connection(ip, author_eligible);
    let (mut sink, mut stream) = socket.split();
    tracing::info!(%ip, "WebSocket connected: {}", conn.id);

    let pump_mailbox = conn.mailbox.clone();
    let pump = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = pump_mailbox.closed() => break,
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    let text = match frame.to_text() {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("Dropping unserializable {} frame: {}", frame.kind, e);
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
        }
        pump_mailbox.close();
        let _ = sink.close().await;
    });

    let mailbox = conn.mailbox.clone();
    loop {
        tokio::select! {
            _ = mailbox.closed() => break,
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => relay.handle_text(&mut conn, &text).await,
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => relay.handle_text(&mut conn, text).await,
                    Err(_) => {
                        conn.send(Frame::error("binary frames must carry UTF-8 JSON"));
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong are answered by the WebSocket layer
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("WebSocket read error on {}: {}", conn.id, e);
                    break;
                }
            },
        }
    }

    relay.disconnect(&mut conn);
    let _ = pump.await;
    tracing::info!(%ip, "WebSocket disconnected: {}", conn.id);
}
