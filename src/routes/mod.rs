//! Route configuration
//!
//! - `api` - REST routes for the cloud collaborators
//! - `tutor` - The `/tutor` WebSocket

pub mod api;
pub mod tutor;

use std::sync::Arc;

use axum::{Router, routing::get};

use crate::handlers;
use crate::state::AppState;

/// Public health check, REST and WebSocket routes bound to `state`.
///
/// Cross-cutting layers (CORS, security headers) are added by the binary.
pub fn create_app_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/", get(handlers::api::health_check));

    public_routes
        .merge(api::create_api_router())
        .merge(tutor::create_tutor_router())
        .with_state(state)
}
