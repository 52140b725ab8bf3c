//! Input endpoints: key presses, combos, raw bitmasks, and notes.
//!
//! Validation failures are always 400, never 500; malformed JSON is mapped
//! through the extractor rejection so it too is a 400.

use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};

use m8link_core::Button;

use crate::error::HttpError;
use crate::state::AppState;

fn parse_key(name: &str) -> Result<Button, HttpError> {
    Button::from_name(name)
        .ok_or_else(|| HttpError::BadRequest(format!("unknown key name: {name}")))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, HttpError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| HttpError::BadRequest(format!("invalid JSON body: {e}")))
}

/// `POST /api/key/{name}` — single press with the standard 50 ms hold.
pub async fn key(
    State(ctx): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, HttpError> {
    let key = parse_key(&name)?;
    ctx.sequencer.press(key).await?;
    Ok(Json(json!({ "ok": true, "key": key.name() })))
}

#[derive(Deserialize)]
pub struct KeysBody {
    pub hold: Option<String>,
    pub press: String,
}

/// `POST /api/keys` — combo (`hold` + `press`) or plain press.
pub async fn keys(
    State(ctx): State<AppState>,
    payload: Result<Json<KeysBody>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let request = body(payload)?;
    let press = parse_key(&request.press)?;
    let hold = request.hold.as_deref().map(parse_key).transpose()?;

    match hold {
        Some(hold) => ctx.sequencer.combo(hold, press).await?,
        None => ctx.sequencer.press(press).await?,
    }
    Ok(Json(json!({
        "ok": true,
        "hold": hold.map(Button::name),
        "press": press.name(),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBody {
    /// Accepted wide so out-of-range values are a 400, not a decode error.
    pub bitmask: u16,
    pub hold_ms: Option<u64>,
    pub release: Option<bool>,
}

/// `POST /api/raw` — write a controller bitmask directly.
pub async fn raw(
    State(ctx): State<AppState>,
    payload: Result<Json<RawBody>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let request = body(payload)?;
    let mask = u8::try_from(request.bitmask)
        .map_err(|_| HttpError::BadRequest(format!("bitmask out of range: {}", request.bitmask)))?;

    let hold = request.hold_ms.map(Duration::from_millis);
    let release = request.release.unwrap_or(true);
    ctx.sequencer.raw(mask, hold, release).await?;

    Ok(Json(json!({
        "ok": true,
        "bitmask": mask,
        "holdMs": request.hold_ms,
    })))
}

#[derive(Deserialize)]
pub struct NoteBody {
    pub note: u16,
    pub vel: Option<u16>,
}

/// `POST /api/note` — note on, default velocity 100.
pub async fn note(
    State(ctx): State<AppState>,
    payload: Result<Json<NoteBody>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let request = body(payload)?;
    let note = u8::try_from(request.note)
        .map_err(|_| HttpError::BadRequest(format!("note out of range: {}", request.note)))?;
    let vel = request.vel.unwrap_or(100);
    let vel = u8::try_from(vel)
        .map_err(|_| HttpError::BadRequest(format!("velocity out of range: {vel}")))?;

    ctx.sequencer.note_on(note, vel).await?;
    Ok(Json(json!({ "ok": true, "note": note, "vel": vel })))
}

/// `POST /api/note/off`.
pub async fn note_off(State(ctx): State<AppState>) -> Result<Json<Value>, HttpError> {
    ctx.sequencer.note_off().await?;
    Ok(Json(json!({ "ok": true })))
}
