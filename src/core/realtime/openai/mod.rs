//! OpenAI Realtime API protocol and transport.
//!
//! # Handshake
//!
//! On open the session sends, in order:
//! 1. `session.update` with instructions, voice, audio formats and server VAD
//! 2. `conversation.item.create` asking the model to greet the student
//! 3. `response.create`
//!
//! # Voices
//!
//! Tutor voices without a realtime equivalent are remapped:
//! `nova -> shimmer`, `fable -> alloy`, `onyx -> echo`.

pub mod config;
pub mod messages;
pub mod transport;

pub use config::{
    DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_VOICE, OPENAI_REALTIME_SAMPLE_RATE,
    OPENAI_REALTIME_URL, build_session_config, handshake_events, map_realtime_voice,
};
pub use messages::{ClientEvent, ConversationItem, ServerEvent, SessionConfig, TurnDetection};
pub use transport::{
    ConnectRequest, RealtimeConnector, RealtimeTransport, TransportCommand, TransportEvent,
    TransportPeer, WebSocketConnector,
};
