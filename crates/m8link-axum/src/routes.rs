//! Route definitions and router construction.
//!
//! REST lives under `/api`; the four WebSocket channels hang off the root
//! and are distinguished purely by path at the upgrade handshake.

use axum::Router;
use axum::extract::Request;
use axum::http::{Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Bare `OPTIONS` (no CORS preflight headers) answers 204; preflights are
/// handled by the CORS layer outside this middleware.
async fn options_no_content(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(req).await
}

/// All REST routes, without the `/api` prefix (nested by the caller).
pub(crate) fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health))
        // Screen views
        .route("/screen", get(handlers::screen::screen))
        .route("/screen/text", get(handlers::screen::screen_text))
        .route("/screen/image", get(handlers::screen::screen_image))
        .route("/state", get(handlers::screen::state))
        .route("/stats", get(handlers::screen::stats))
        // Input
        .route("/key/{name}", post(handlers::input::key))
        .route("/keys", post(handlers::input::keys))
        .route("/raw", post(handlers::input::raw))
        .route("/note", post(handlers::input::note))
        .route("/note/off", post(handlers::input::note_off))
        // Device control
        .route("/reset", post(handlers::link::reset))
        .route("/enable", post(handlers::link::enable))
        .route("/ports", get(handlers::link::ports))
        .route("/port", post(handlers::link::select_port))
        .route("/reconnect", post(handlers::link::reconnect))
        // Audio recording
        .route("/audio/record", post(handlers::audio::record))
        .route("/audio/record/stop", post(handlers::audio::record_stop))
}

/// Create the main router: `/api/*` REST plus the WebSocket channels.
///
/// # Path Parameter Syntax
/// Axum 0.8 uses brace syntax for path parameters: `{name}`
pub fn create_router(ctx: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let api = api_routes()
        .layer(middleware::from_fn(options_no_content))
        .with_state(ctx.clone());

    Router::new()
        .route("/control", get(ws::control_ws))
        .route("/screen", get(ws::screen_ws))
        .route("/display", get(ws::display_ws))
        .route("/audio", get(ws::audio_ws))
        .with_state(ctx)
        .nest("/api", api)
        .layer(cors)
}
