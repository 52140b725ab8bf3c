//! Screen and state views: `GET /api/screen[.../text|/image]`, `/api/state`,
//! `/api/stats`.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use serde_json::{Value, json};

use crate::state::AppState;

/// `GET /api/screen` — grid rows, cursor, and last-update timestamp.
pub async fn screen(State(ctx): State<AppState>) -> Json<Value> {
    Json(ctx.fanout.screen_json())
}

/// `GET /api/screen/text` — the rendered grid as plain text.
pub async fn screen_text(State(ctx): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        ctx.fanout.screen_text(),
    )
}

/// `GET /api/screen/image` — a BMP snapshot of the framebuffer.
pub async fn screen_image(State(ctx): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "image/bmp")],
        ctx.fanout.snapshot_bmp(),
    )
}

/// `GET /api/state` — the tracked input-state estimate.
pub async fn state(State(ctx): State<AppState>) -> Json<Value> {
    Json(ctx.fanout.tracked_snapshot())
}

/// `GET /api/stats` — delta cache statistics.
pub async fn stats(State(ctx): State<AppState>) -> Json<Value> {
    let stats = ctx.fanout.delta_stats();
    Json(json!({
        "sent": stats.sent,
        "skipped": stats.skipped,
        "total": stats.total(),
        "ratio": stats.ratio(),
    }))
}
