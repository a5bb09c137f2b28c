//! Realtime voice sessions against the OpenAI Realtime API.
//!
//! # Architecture
//!
//! - [`SessionRegistry`] owns at most one [`RealtimeSession`] per endpoint
//! - [`RealtimeConnector`] opens the transport (WebSocket in production)
//! - Inbound provider events are forwarded verbatim to the endpoint's [`EventSink`]
//! - [`RealtimeEventDispatcher`] is the host-side sink that plays audio and
//!   updates the transcript
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz, base64 encoded in JSON frames.

mod base;
pub mod inbound;
pub mod openai;
pub mod registry;
pub mod session;

pub use base::{
    CONNECT_TIMEOUT, EndpointId, EventSink, RealtimeError, RealtimeResult, RealtimeStartConfig,
    SessionNotice, SessionState,
};
pub use inbound::RealtimeEventDispatcher;
pub use openai::{
    ConnectRequest, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, RealtimeConnector,
    RealtimeTransport, TransportCommand, TransportEvent, TransportPeer, WebSocketConnector,
};
pub use registry::{RegistryRelay, SessionRegistry};
pub use session::RealtimeSession;
