//! WebSocket upgrade handlers for the four channels.
//!
//! | Path | Direction | Payload |
//! |------|-----------|---------|
//! | `/control` | client → server | JSON input messages |
//! | `/screen` | server → client | BMP frames at 10 fps |
//! | `/display` | server → client | verbatim serial chunks |
//! | `/audio` | server → client | `[0x00, pcm…]` / `[0x01, json…]` frames |
//!
//! Malformed control messages are ignored without dropping the socket; a
//! failed send on any push channel reaps exactly that consumer.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use m8link_core::Button;

use crate::state::AppState;

/// `GET /control` — JSON input channel.
pub async fn control_ws(ws: WebSocketUpgrade, State(ctx): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_control(socket, ctx))
}

/// `GET /screen` — BMP push channel.
pub async fn screen_ws(ws: WebSocketUpgrade, State(ctx): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (id, rx) = ctx.fanout.image_subs.subscribe();
        info!(id, "screen consumer connected");
        pump(socket, rx).await;
        ctx.fanout.image_subs.unsubscribe(id);
        info!(id, "screen consumer closed");
    })
}

/// `GET /display` — raw serial chunk push channel.
pub async fn display_ws(ws: WebSocketUpgrade, State(ctx): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (id, rx) = ctx.fanout.display_subs.subscribe();
        info!(id, "display consumer connected");
        pump(socket, rx).await;
        ctx.fanout.display_subs.unsubscribe(id);
        info!(id, "display consumer closed");
    })
}

/// `GET /audio` — framed PCM push channel. The first consumer starts the
/// capture pipeline.
pub async fn audio_ws(ws: WebSocketUpgrade, State(ctx): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        ctx.ensure_capture().await;
        let (id, rx) = ctx.hub.subscribe();
        info!(id, "audio consumer connected");
        pump(socket, rx).await;
        ctx.hub.unsubscribe(id);
        info!(id, "audio consumer closed");
    })
}

/// Drain a subscriber channel into a socket until either side closes.
///
/// Incoming frames on push channels are ignored (pings and stray client
/// payloads); a send failure ends only this socket.
async fn pump(socket: WebSocket, mut rx: mpsc::Receiver<Vec<u8>>) {
    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            payload = rx.recv() => {
                let Some(bytes) = payload else {
                    // Subscriber set dropped us (stalled queue); close out.
                    break;
                };
                if sender.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn handle_control(mut socket: WebSocket, ctx: AppState) {
    info!("control consumer connected");
    while let Some(incoming) = socket.recv().await {
        match incoming {
            Ok(Message::Text(text)) => {
                let Ok(message) = serde_json::from_str::<Value>(text.as_str()) else {
                    debug!("control message is not JSON, ignoring");
                    continue;
                };
                apply_control(&ctx, &message).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    info!("control consumer closed");
}

/// Apply one control message. Unknown types and bad payloads are ignored;
/// link errors are logged but never drop the socket.
async fn apply_control(ctx: &AppState, message: &Value) {
    let result = match message.get("type").and_then(Value::as_str) {
        Some("key") => {
            let Some(key) = message.get("key").and_then(Value::as_str).and_then(Button::from_name)
            else {
                debug!(?message, "control: unknown key, ignoring");
                return;
            };
            ctx.sequencer.press(key).await
        }
        Some("keys") => {
            let Some(press) = message
                .get("press")
                .and_then(Value::as_str)
                .and_then(Button::from_name)
            else {
                debug!(?message, "control: unknown press key, ignoring");
                return;
            };
            let hold = message
                .get("hold")
                .and_then(Value::as_str)
                .and_then(Button::from_name);
            match hold {
                Some(hold) => ctx.sequencer.combo(hold, press).await,
                None => ctx.sequencer.press(press).await,
            }
        }
        Some("note") => {
            let note = message
                .get("note")
                .and_then(Value::as_u64)
                .and_then(|n| u8::try_from(n).ok());
            let vel = message.get("vel").and_then(Value::as_u64).unwrap_or(100);
            let (Some(note), Ok(vel)) = (note, u8::try_from(vel)) else {
                debug!(?message, "control: note out of range, ignoring");
                return;
            };
            ctx.sequencer.note_on(note, vel).await
        }
        Some("noteOff") => ctx.sequencer.note_off().await,
        _ => {
            debug!(?message, "control: unknown message type, ignoring");
            return;
        }
    };

    if let Err(e) = result {
        warn!(error = %e, "control input not delivered to device");
    }
}
