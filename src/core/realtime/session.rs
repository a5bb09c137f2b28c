//! One realtime connection owned by one endpoint.
//!
//! A session moves `Connecting -> Open -> Closed` and never reopens. Outbound
//! sends are dropped unless the session is `Open`. Inbound provider events are
//! forwarded verbatim to the endpoint's [`EventSink`] only while it is `Open`.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::base::{
    EndpointId, EventSink, RealtimeError, RealtimeResult, RealtimeStartConfig, SessionState,
};
use super::openai::config::{build_ws_url, handshake_events, map_realtime_voice};
use super::openai::messages::ClientEvent;
use super::openai::transport::{
    ConnectRequest, RealtimeConnector, TransportCommand, TransportEvent,
};

/// A live (or finished) realtime session.
#[derive(Debug)]
pub struct RealtimeSession {
    id: Uuid,
    endpoint: EndpointId,
    state: RwLock<SessionState>,
    outbound: mpsc::Sender<TransportCommand>,
    closed: CancellationToken,
    model: String,
    voice: String,
}

impl RealtimeSession {
    fn new(
        endpoint: EndpointId,
        outbound: mpsc::Sender<TransportCommand>,
        config: &RealtimeStartConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint,
            state: RwLock::new(SessionState::Connecting),
            outbound,
            closed: CancellationToken::new(),
            model: config.model.clone(),
            voice: map_realtime_voice(config.voice.as_deref()),
        }
    }

    /// Unique id of this session instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Voice after compatibility remapping.
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Send a typed client event. Returns `false` when dropped.
    pub fn send_event(&self, event: &ClientEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(json) => self.send_text(json),
            Err(e) => {
                warn!("Failed to serialize client event: {}", e);
                false
            }
        }
    }

    /// Relay an arbitrary JSON message. Returns `false` when dropped.
    pub fn send_json(&self, message: &Value) -> bool {
        self.send_text(message.to_string())
    }

    /// Append PCM16 audio to the provider's input buffer.
    pub fn send_audio(&self, pcm: &[u8]) -> bool {
        self.send_event(&ClientEvent::audio_append(pcm))
    }

    fn send_text(&self, json: String) -> bool {
        if !self.is_open() {
            debug!(endpoint = %self.endpoint, "Dropping send on session that is not open");
            return false;
        }
        match self.outbound.try_send(TransportCommand::Text(json)) {
            Ok(()) => true,
            Err(e) => {
                warn!(endpoint = %self.endpoint, "Realtime send dropped: {}", e);
                false
            }
        }
    }

    /// Close the session and release its transport. Idempotent.
    pub fn close(&self) {
        if self.mark_closed() {
            let _ = self.outbound.try_send(TransportCommand::Close);
            info!(endpoint = %self.endpoint, session_id = %self.id, "Realtime session closed");
        }
    }

    fn mark_open(&self) -> bool {
        let mut state = self.state.write();
        if *state == SessionState::Connecting {
            *state = SessionState::Open;
            true
        } else {
            false
        }
    }

    /// Move to `Closed`. Returns `true` if the session was open or connecting.
    fn mark_closed(&self) -> bool {
        let mut state = self.state.write();
        let was_live = *state != SessionState::Closed;
        *state = SessionState::Closed;
        drop(state);
        self.closed.cancel();
        was_live
    }
}

/// Connect and perform the opening handshake.
///
/// On success the session is `Open` and has already queued
/// `session.update`, the greeting item and `response.create`, in that order.
pub(crate) async fn open(
    connector: &dyn RealtimeConnector,
    endpoint: EndpointId,
    config: &RealtimeStartConfig,
) -> RealtimeResult<(Arc<RealtimeSession>, mpsc::Receiver<TransportEvent>)> {
    let transport = connector
        .connect(ConnectRequest {
            url: build_ws_url(config),
            api_key: config.api_key.clone(),
        })
        .await?;

    let session = Arc::new(RealtimeSession::new(endpoint, transport.outbound, config));
    session.mark_open();

    for event in handshake_events(config) {
        let json = serde_json::to_string(&event)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        session
            .outbound
            .send(TransportCommand::Text(json))
            .await
            .map_err(|_| RealtimeError::ConnectionFailed("Transport closed during handshake".to_string()))?;
    }

    info!(
        endpoint = %session.endpoint,
        session_id = %session.id,
        model = %session.model,
        voice = %session.voice,
        "Realtime session open"
    );
    Ok((session, transport.inbound))
}

/// Forward inbound provider events until the session ends.
///
/// `on_end` runs once when the loop exits, before the sink hears about an
/// unsolicited close. Closes requested through [`RealtimeSession::close`] are
/// not reported to the sink.
pub(crate) fn spawn_event_pump<F>(
    session: Arc<RealtimeSession>,
    mut inbound: mpsc::Receiver<TransportEvent>,
    sink: Arc<dyn EventSink>,
    on_end: F,
) where
    F: FnOnce(&RealtimeSession) + Send + 'static,
{
    tokio::spawn(async move {
        let reason = loop {
            tokio::select! {
                _ = session.closed.cancelled() => break None,
                event = inbound.recv() => match event {
                    Some(TransportEvent::Text(text)) => {
                        match serde_json::from_str::<Value>(&text) {
                            Ok(value) if session.is_open() => sink.deliver(&session.endpoint, value),
                            Ok(_) => {}
                            Err(e) => warn!(endpoint = %session.endpoint, "Unparseable realtime event: {}", e),
                        }
                    }
                    Some(TransportEvent::Closed(reason)) => {
                        break Some(reason.unwrap_or_else(|| "Connection closed".to_string()));
                    }
                    Some(TransportEvent::Error(e)) => break Some(e),
                    None => break Some("Connection closed".to_string()),
                },
            }
        };

        let unsolicited = session.mark_closed();
        on_end(&session);
        if unsolicited {
            let reason = reason.unwrap_or_else(|| "Connection closed".to_string());
            warn!(endpoint = %session.endpoint, "Realtime session ended: {}", reason);
            sink.closed(&session.endpoint, &reason);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::base::SessionNotice;
    use crate::core::realtime::openai::transport::{RealtimeTransport, TransportPeer};
    use crate::core::tutor::page::PageContent;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct PairConnector {
        peer: Mutex<Option<TransportPeer>>,
        transport: Mutex<Option<RealtimeTransport>>,
    }

    impl PairConnector {
        fn new() -> Self {
            let (transport, peer) = RealtimeTransport::pair();
            Self {
                peer: Mutex::new(Some(peer)),
                transport: Mutex::new(Some(transport)),
            }
        }

        fn take_peer(&self) -> TransportPeer {
            self.peer.lock().take().unwrap()
        }
    }

    #[async_trait]
    impl RealtimeConnector for PairConnector {
        async fn connect(&self, _request: ConnectRequest) -> RealtimeResult<RealtimeTransport> {
            self.transport
                .lock()
                .take()
                .ok_or_else(|| RealtimeError::ConnectionFailed("used".into()))
        }
    }

    fn config() -> RealtimeStartConfig {
        RealtimeStartConfig::new(
            "sk-test",
            PageContent {
                title: "Cells".into(),
                text_content: "The mitochondria is the powerhouse of the cell, producing ATP.".into(),
                ..Default::default()
            },
        )
    }

    async fn recv_type(peer: &mut TransportPeer) -> String {
        match peer.commands.recv().await {
            Some(TransportCommand::Text(json)) => {
                serde_json::from_str::<Value>(&json).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_sends_handshake_in_order() {
        let connector = PairConnector::new();
        let mut peer = connector.take_peer();
        let (session, _inbound) = open(&connector, "tab".into(), &config()).await.unwrap();

        assert!(session.is_open());
        assert_eq!(session.voice(), "shimmer");
        assert_eq!(recv_type(&mut peer).await, "session.update");
        assert_eq!(recv_type(&mut peer).await, "conversation.item.create");
        assert_eq!(recv_type(&mut peer).await, "response.create");
    }

    #[tokio::test]
    async fn test_send_dropped_after_close() {
        let connector = PairConnector::new();
        let mut peer = connector.take_peer();
        let (session, _inbound) = open(&connector, "tab".into(), &config()).await.unwrap();
        for _ in 0..3 {
            recv_type(&mut peer).await;
        }

        assert!(session.send_audio(&[0, 0]));
        assert_eq!(recv_type(&mut peer).await, "input_audio_buffer.append");

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(peer.commands.recv().await, Some(TransportCommand::Close));
        assert!(!session.send_json(&json!({"type": "response.create"})));
        session.close();
    }

    #[tokio::test]
    async fn test_pump_forwards_and_reports_remote_close() {
        let connector = PairConnector::new();
        let peer = connector.take_peer();
        let (session, inbound) = open(&connector, "tab".into(), &config()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<SessionNotice>();
        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
        spawn_event_pump(session.clone(), inbound, Arc::new(tx), move |s| {
            let _ = ended_tx.send(s.id());
        });

        peer.events
            .send(TransportEvent::Text(r#"{"type":"response.done"}"#.into()))
            .await
            .unwrap();
        peer.events
            .send(TransportEvent::Text("not json".into()))
            .await
            .unwrap();
        peer.events
            .send(TransportEvent::Closed(Some("server went away".into())))
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(SessionNotice::Event(json!({"type": "response.done"})))
        );
        assert_eq!(
            rx.recv().await,
            Some(SessionNotice::Closed("server went away".into()))
        );
        assert_eq!(ended_rx.recv().await, Some(session.id()));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_pump_silent_on_requested_close() {
        let connector = PairConnector::new();
        let _peer = connector.take_peer();
        let (session, inbound) = open(&connector, "tab".into(), &config()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<SessionNotice>();
        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
        spawn_event_pump(session.clone(), inbound, Arc::new(tx), move |_| {
            let _ = ended_tx.send(());
        });

        session.close();
        assert_eq!(ended_rx.recv().await, Some(()));
        assert!(rx.try_recv().is_err());
    }
}
