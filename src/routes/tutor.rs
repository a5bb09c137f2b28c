//! Tutor WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::tutor::tutor_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the tutor WebSocket router
///
/// # Endpoint
///
/// `GET /tutor` - WebSocket upgrade, one connection per browser tab
///
/// # Example
///
/// ```json
/// // Tab starts a turn-based session
/// {"type": "start_tutor", "page": {"title": "Fractions", "text_content": "...", "screenshot": "data:image/png;base64,..."}}
///
/// // Server greets
/// {"type": "message", "role": "assistant", "content": "Hi! ..."}
/// {"type": "play_audio", "request_id": "...", "format": "mp3", "audio": "..."}
///
/// // Tab reports playback done
/// {"type": "playback_finished", "request_id": "..."}
/// ```
pub fn create_tutor_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tutor", get(tutor_handler))
        .layer(TraceLayer::new_for_http())
}
