//! Audio recording endpoints.

use std::path::PathBuf;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::HttpError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RecordBody {
    pub path: String,
}

/// `POST /api/audio/record` — start appending raw PCM to a file. Starts the
/// capture pipeline if it is not already running; an active recording is
/// closed first.
pub async fn record(
    State(ctx): State<AppState>,
    payload: Result<Json<RecordBody>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let request = payload
        .map(|Json(inner)| inner)
        .map_err(|e| HttpError::BadRequest(format!("invalid JSON body: {e}")))?;
    let path = PathBuf::from(&request.path);

    ctx.hub
        .start_recording(&path)
        .map_err(|e| HttpError::BadRequest(format!("cannot record to {}: {e}", path.display())))?;
    ctx.ensure_capture().await;

    Ok(Json(json!({ "ok": true, "path": request.path })))
}

/// `POST /api/audio/record/stop`.
pub async fn record_stop(State(ctx): State<AppState>) -> Json<Value> {
    let stopped = ctx.hub.stop_recording();
    Json(json!({
        "ok": true,
        "path": stopped.map(|p| p.display().to_string()),
    }))
}
