//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and REST access to the cloud collaborators
//! - `tutor` - Per-tab tutoring WebSocket (realtime and turn-based)

pub mod api;
pub mod tutor;

pub use tutor::tutor_handler;
