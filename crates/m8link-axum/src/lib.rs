//! Axum adapter for the M8 gateway: the REST surface and the four
//! WebSocket channels (`/control`, `/screen`, `/display`, `/audio`).
//!
//! The composition root lives in [`bootstrap`]; `m8link-cli` calls
//! [`bootstrap::start_server`] after resolving configuration.

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod ws;

pub use bootstrap::{GatewayContext, bootstrap, start_server};
pub use error::HttpError;
pub use routes::create_router;
pub use state::AppState;
