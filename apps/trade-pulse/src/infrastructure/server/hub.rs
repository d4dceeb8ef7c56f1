//! Subscriber WebSocket endpoint.
//!
//! Each upgraded socket is registered with the hub, greeted with a
//! `welcome` frame and then fed from its own queue. One task per socket
//! drives the queue, the keep-alive ping, inbound frames and shutdown.
//!
//! A client may also publish by sending a `marketEvent` frame. It goes
//! through the same validation as the publish endpoint; bad frames are
//! logged and skipped without closing the socket.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};

use super::AppState;
use crate::infrastructure::broadcast::{SubscriberId, SubscriberRegistration};
use crate::infrastructure::codec::{HubMessage, JsonCodec};

/// WebSocket upgrade handler.
pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let SubscriberRegistration { id, mut events } = state.hub.register();
    let (mut sender, mut receiver) = socket.split();

    let welcome = HubMessage::Welcome {
        connection_id: id.to_string(),
    };
    if let Err(e) = send_frame(&mut sender, &state.codec, &welcome).await {
        tracing::debug!(subscriber_id = %id, error = %e, "Failed to send welcome");
        state.hub.unregister(id);
        return;
    }

    let period = state.keepalive_interval;
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: "server shutting down".into(),
                };
                let _ = sender.send(Message::Close(Some(frame))).await;
                break "server shutdown";
            }
            event = events.recv() => {
                let Some(event) = event else {
                    // Unregistered elsewhere; the queue is drained.
                    let _ = sender.send(Message::Close(None)).await;
                    break "unregistered";
                };
                let frame = HubMessage::MarketEvent((*event).clone());
                if let Err(e) = send_frame(&mut sender, &state.codec, &frame).await {
                    tracing::debug!(subscriber_id = %id, error = %e, "Send failed");
                    break "send failed";
                }
            }
            _ = keepalive.tick() => {
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break "keep-alive failed";
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => handle_inbound(&state, id, text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break "client closed",
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(subscriber_id = %id, error = %e, "WebSocket error");
                        break "socket error";
                    }
                }
            }
        }
    };

    state.hub.unregister(id);
    tracing::info!(subscriber_id = %id, reason, "Subscriber connection closed");
}

/// Publish a `marketEvent` frame received from a client.
fn handle_inbound(state: &AppState, id: SubscriberId, text: &str) {
    match state.codec.decode(text) {
        Ok(HubMessage::MarketEvent(event)) => {
            if let Err(e) = state.publisher.publish(event) {
                tracing::warn!(subscriber_id = %id, error = %e, "Rejected event from subscriber");
            }
        }
        Ok(HubMessage::Welcome { .. }) => {
            tracing::debug!(subscriber_id = %id, "Ignoring welcome frame from subscriber");
        }
        Err(e) => {
            tracing::warn!(subscriber_id = %id, error = %e, "Malformed frame from subscriber");
        }
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    codec: &JsonCodec,
    message: &HubMessage,
) -> anyhow::Result<()> {
    let text = codec.encode(message)?;
    sender.send(Message::Text(text.into())).await?;
    Ok(())
}
