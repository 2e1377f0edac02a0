//! WebSocket upgrade handler and per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::AppState;

use super::events::ChatMessage;
use super::handler::StreamHandler;
use super::registry::Mailbox;

/// Close codes (4000-range for application-level).
const CLOSE_SESSION_TIMEOUT: u16 = 4009;
const CLOSE_SESSION_REPLACED: u16 = 4010;

/// How often the loop checks the idle deadlines.
const TICK_MS: u64 = 100;

pub fn router() -> Router<AppState> {
    Router::new().route("/chat", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut handler = StreamHandler::new(state.authority.clone());
    let idle_timeout = state.config.idle_timeout;
    let outbound_heartbeat = state.config.outbound_heartbeat;

    tracing::debug!(connection_id = %handler.connection_id(), "chat stream opened");

    let period = Duration::from_millis(TICK_MS)
        .min(outbound_heartbeat)
        .max(Duration::from_millis(1));
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // First tick fires immediately; skip it.

    let mut last_inbound = Instant::now();
    let mut last_outbound = Instant::now();

    loop {
        let mailbox = handler.mailbox().cloned();

        tokio::select! {
            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %handler.connection_id(), "ws read error");
                        break;
                    }
                    // Ping, pong and binary frames still count as activity.
                    Some(Ok(_)) => {
                        last_inbound = Instant::now();
                        continue;
                    }
                };
                last_inbound = Instant::now();

                let message: ChatMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::debug!(error = %e, connection_id = %handler.connection_id(), "ignoring malformed frame");
                        continue;
                    }
                };

                let outbound = handler.handle_inbound(message).await;
                if handler.is_terminated() {
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_REPLACED, "Session replaced").await;
                    break;
                }
                if send_all(&mut ws_tx, outbound, &mut last_outbound).await.is_err() {
                    break;
                }
            }

            _ = wait_for_mail(mailbox.as_deref()) => {
                if handler.is_replaced() {
                    tracing::info!(
                        connection_id = %handler.connection_id(),
                        username = handler.username().unwrap_or_default(),
                        "closing replaced chat stream"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_REPLACED, "Session replaced").await;
                    break;
                }
                let outbound = handler.drain();
                if send_all(&mut ws_tx, outbound, &mut last_outbound).await.is_err() {
                    break;
                }
            }

            _ = ticker.tick() => {
                if last_inbound.elapsed() >= idle_timeout {
                    tracing::debug!(
                        connection_id = %handler.connection_id(),
                        "idle timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Idle timeout").await;
                    break;
                }
                if handler.is_active() && last_outbound.elapsed() >= outbound_heartbeat {
                    let heartbeat = vec![ChatMessage::system_heartbeat()];
                    if send_all(&mut ws_tx, heartbeat, &mut last_outbound).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    handler.terminate();
}

/// Resolves when the mailbox has something to deliver or was closed.
/// Never resolves before the connection has identified.
async fn wait_for_mail(mailbox: Option<&Mailbox>) {
    match mailbox {
        Some(mailbox) => mailbox.notified().await,
        None => std::future::pending().await,
    }
}

/// Write messages in order as text frames.
async fn send_all(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    messages: Vec<ChatMessage>,
    last_outbound: &mut Instant,
) -> Result<(), axum::Error> {
    if messages.is_empty() {
        return Ok(());
    }
    for message in &messages {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode outbound message");
                continue;
            }
        };
        ws_tx.send(Message::Text(json.into())).await?;
    }
    *last_outbound = Instant::now();
    Ok(())
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
