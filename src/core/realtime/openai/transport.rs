//! WebSocket transport to the OpenAI Realtime API.
//!
//! The transport is split into two channels so the session layer never touches
//! the socket directly:
//! - `outbound`: JSON text frames and the close request
//! - `inbound`: text frames from the provider, then exactly one terminal event
//!
//! [`RealtimeConnector`] is the seam tests replace with an in-memory pair.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};
use tracing::{debug, error, info, warn};

use super::config::sub_protocols;
use crate::core::realtime::base::{RealtimeError, RealtimeResult};

/// Capacity of both transport channels.
pub const TRANSPORT_CHANNEL_CAPACITY: usize = 256;

/// Commands accepted by a running transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    Text(String),
    Close,
}

/// Events produced by a running transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Text(String),
    /// Remote close, with the close reason when one was given
    Closed(Option<String>),
    Error(String),
}

/// An open connection, seen from the session side.
#[derive(Debug)]
pub struct RealtimeTransport {
    pub outbound: mpsc::Sender<TransportCommand>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// The far side of an in-memory [`RealtimeTransport`].
#[derive(Debug)]
pub struct TransportPeer {
    pub commands: mpsc::Receiver<TransportCommand>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl RealtimeTransport {
    /// Connected in-memory transport and the peer that drives it.
    pub fn pair() -> (Self, TransportPeer) {
        let (cmd_tx, cmd_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        let (evt_tx, evt_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        (
            Self {
                outbound: cmd_tx,
                inbound: evt_rx,
            },
            TransportPeer {
                commands: cmd_rx,
                events: evt_tx,
            },
        )
    }
}

/// Where and how to connect.
#[derive(Clone)]
pub struct ConnectRequest {
    /// Full WebSocket URL including the `model` query
    pub url: String,
    pub api_key: String,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Opens realtime transports.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Resolve once the transport is open, or fail.
    async fn connect(&self, request: ConnectRequest) -> RealtimeResult<RealtimeTransport>;
}

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RealtimeConnector for WebSocketConnector {
    async fn connect(&self, request: ConnectRequest) -> RealtimeResult<RealtimeTransport> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        let protocols = HeaderValue::from_str(&sub_protocols(&request.api_key))
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("Invalid API key: {e}")))?;
        let headers = ws_request.headers_mut();
        headers.insert("Sec-WebSocket-Protocol", protocols);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(ws_request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        info!("Connected to OpenAI Realtime API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (transport, mut peer) = RealtimeTransport::pair();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = peer.commands.recv() => {
                        match command {
                            Some(TransportCommand::Text(json)) => {
                                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                                    error!("Failed to send WebSocket message: {}", e);
                                    let _ = peer.events.send(TransportEvent::Error(e.to_string())).await;
                                    break;
                                }
                            }
                            Some(TransportCommand::Close) | None => {
                                debug!("Closing realtime WebSocket");
                                let _ = ws_sink.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }

                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if peer.events.send(TransportEvent::Text(text.to_string())).await.is_err() {
                                    let _ = ws_sink.send(Message::Close(None)).await;
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    warn!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("WebSocket closed by server");
                                let reason = frame.map(|f| f.reason.to_string());
                                let _ = peer.events.send(TransportEvent::Closed(reason)).await;
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                let _ = peer.events.send(TransportEvent::Error(e.to_string())).await;
                                break;
                            }
                            None => {
                                let _ = peer.events.send(TransportEvent::Closed(None)).await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(transport)
    }
}
