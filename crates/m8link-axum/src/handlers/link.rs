//! Device-control endpoints: reset/enable, port enumeration and selection,
//! forced reconnect.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};

use m8link_runtime::serial::list_ports;

use crate::error::HttpError;
use crate::state::AppState;

/// `POST /api/reset` — ask the device to resend the full screen. The
/// projection caches are cleared so the re-sent screen reaches every
/// consumer.
pub async fn reset(State(ctx): State<AppState>) -> Result<Json<Value>, HttpError> {
    ctx.fanout.reset_projection();
    ctx.link.reset_display().await?;
    Ok(Json(json!({ "ok": true })))
}

/// `POST /api/enable` — run the display enable handshake.
pub async fn enable(State(ctx): State<AppState>) -> Result<Json<Value>, HttpError> {
    ctx.link.enable_display().await?;
    Ok(Json(json!({ "ok": true })))
}

/// `GET /api/ports` — every serial port on the host, M8s flagged.
pub async fn ports(State(_ctx): State<AppState>) -> Result<Json<Value>, HttpError> {
    let ports = list_ports().map_err(HttpError::from)?;
    Ok(Json(json!({ "ports": ports })))
}

#[derive(Deserialize)]
pub struct PortBody {
    pub port: String,
}

/// `POST /api/port` — connect to an explicitly chosen device path.
pub async fn select_port(
    State(ctx): State<AppState>,
    payload: Result<Json<PortBody>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let request = payload
        .map(|Json(inner)| inner)
        .map_err(|e| HttpError::BadRequest(format!("invalid JSON body: {e}")))?;
    let path = ctx.link.connect_to(&request.port).await?;
    Ok(Json(json!({ "status": "connected", "port": path })))
}

/// `POST /api/reconnect` — drop the current link (if any) and scan again.
/// An absent device is a normal outcome, not an error.
pub async fn reconnect(State(ctx): State<AppState>) -> Json<Value> {
    match ctx.link.force_reconnect().await {
        Ok(path) => Json(json!({
            "status": "connected",
            "port": path,
            "connected": true,
        })),
        Err(e) => {
            if ctx.config.auto_reconnect {
                ctx.link.spawn_reconnect_loop();
            }
            Json(json!({
                "status": e.to_string(),
                "port": Value::Null,
                "connected": false,
            }))
        }
    }
}
