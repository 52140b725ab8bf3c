//! HTTP error type and status mapping.
//!
//! Input validation failures are 400s; a missing device is 503; nothing in
//! the REST surface should ever turn into a 500 except a genuine bug.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use m8link_runtime::LinkError;

/// Axum-facing error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Invalid input (unknown key name, bitmask out of range, bad JSON).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The device is not available for the requested operation.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            HttpError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            HttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        let body = ErrorBody {
            error: message,
            status: status.as_u16(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<LinkError> for HttpError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::NotConnected | LinkError::DeviceNotFound => {
                HttpError::ServiceUnavailable(err.to_string())
            }
            LinkError::Open { .. } => HttpError::ServiceUnavailable(err.to_string()),
            LinkError::Io(_) | LinkError::Enumeration(_) => HttpError::Internal(err.to_string()),
        }
    }
}
