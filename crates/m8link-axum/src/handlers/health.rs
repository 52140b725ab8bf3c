//! `GET /api/health`.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::state::AppState;

/// Link status plus TCP client count. Always 200; an absent device simply
/// reports `connected: false`.
pub async fn health(State(ctx): State<AppState>) -> Json<Value> {
    let clients = ctx.tcp.as_ref().map_or(0, |tcp| tcp.client_count());
    Json(json!({
        "connected": ctx.link.is_connected(),
        "port": ctx.link.port_path(),
        "clients": clients,
    }))
}
