use axum::{Router, extract::DefaultBodyLimit, routing::post};
use tower_http::trace::TraceLayer;

use crate::handlers::api::{self, MAX_AUDIO_UPLOAD};
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST router for the cloud collaborators
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/vision-chat", post(api::vision_chat))
        .route(
            "/transcribe",
            post(api::transcribe).layer(DefaultBodyLimit::max(MAX_AUDIO_UPLOAD + 1024 * 1024)),
        )
        .route("/speech", post(api::speech))
        .layer(TraceLayer::new_for_http())
}
