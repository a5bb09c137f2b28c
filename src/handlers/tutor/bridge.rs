//! The tab as seen by the tutor core.
//!
//! [`TabBridge`] turns host requests (capture a snapshot, play audio, speak
//! locally) into outgoing messages tagged with a `request_id`, then waits for
//! the tab's correlated reply. Pending replies live in a `DashMap` of oneshot
//! senders; a waiter that goes away removes its own entry, and closing the
//! bridge resolves every waiter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::messages::{TutorMessageRoute, TutorOutgoingMessage};
use crate::core::audio::codec::{encode_pcm16, to_base64};
use crate::core::audio::playback::{AudioSink, PlaybackSegment, PlaybackTicket};
use crate::core::realtime::{EndpointId, EventSink, RealtimeEventDispatcher};
use crate::core::status::{SessionStatus, StatusCell};
use crate::core::tutor::conversation::Role;
use crate::core::tutor::host::{LocalSpeech, PlaybackError, SnapshotSource, SpeechOutput, TutorUi};
use crate::core::tutor::page::VisualSnapshot;

/// How long the tab gets to answer a snapshot request.
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// A correlated answer from the tab.
#[derive(Debug, Clone, PartialEq)]
pub enum HostReply {
    Snapshot(Option<String>),
    PlaybackFinished(Option<String>),
}

/// Removes a pending entry when its waiter finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a DashMap<Uuid, oneshot::Sender<HostReply>>,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Request/reply channel to one tab.
pub struct TabBridge {
    outgoing: mpsc::Sender<TutorMessageRoute>,
    pending: DashMap<Uuid, oneshot::Sender<HostReply>>,
    closed: CancellationToken,
}

impl TabBridge {
    pub fn new(outgoing: mpsc::Sender<TutorMessageRoute>) -> Self {
        Self {
            outgoing,
            pending: DashMap::new(),
            closed: CancellationToken::new(),
        }
    }

    /// Queue a message without waiting. Dropped when the writer is saturated.
    pub fn send(&self, message: TutorOutgoingMessage) -> bool {
        match self.outgoing.try_send(TutorMessageRoute::Outgoing(message)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Tab writer saturated, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Route a reply to whoever is waiting for `request_id`.
    pub fn resolve(&self, request_id: Uuid, reply: HostReply) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, waiter)) => waiter.send(reply).is_ok(),
            None => {
                debug!(%request_id, "Reply for unknown or expired request");
                false
            }
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Resolve all waiters and refuse new requests.
    pub fn close(&self) {
        self.closed.cancel();
        self.pending.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Send `message` built around a fresh request id and await the reply.
    ///
    /// `None` when the bridge closes, the tab cannot be reached or `timeout` elapses.
    async fn request(
        &self,
        build: impl FnOnce(Uuid) -> TutorOutgoingMessage,
        timeout: Option<Duration>,
    ) -> Option<HostReply> {
        if self.is_closed() {
            return None;
        }
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        if self
            .outgoing
            .send(TutorMessageRoute::Outgoing(build(id)))
            .await
            .is_err()
        {
            return None;
        }

        let reply = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, rx).await.ok()?.ok(),
                None => rx.await.ok(),
            }
        };
        tokio::select! {
            _ = self.closed.cancelled() => None,
            reply = reply => reply,
        }
    }
}

#[async_trait]
impl SnapshotSource for TabBridge {
    async fn capture(&self) -> Option<VisualSnapshot> {
        let reply = self
            .request(
                |request_id| TutorOutgoingMessage::CaptureSnapshot { request_id },
                Some(SNAPSHOT_TIMEOUT),
            )
            .await;
        match reply {
            Some(HostReply::Snapshot(Some(image))) if !image.trim().is_empty() => {
                Some(VisualSnapshot::new(image))
            }
            Some(_) => None,
            None => {
                debug!("Snapshot request went unanswered");
                None
            }
        }
    }
}

#[async_trait]
impl SpeechOutput for TabBridge {
    async fn play(&self, audio: Bytes) -> Result<(), PlaybackError> {
        let encoded = to_base64(&audio);
        let reply = self
            .request(
                |request_id| TutorOutgoingMessage::PlayAudio {
                    request_id,
                    format: "mp3".to_string(),
                    audio: encoded,
                },
                None,
            )
            .await;
        match reply {
            Some(HostReply::PlaybackFinished(None)) => Ok(()),
            Some(HostReply::PlaybackFinished(Some(error))) => Err(PlaybackError(error)),
            Some(other) => Err(PlaybackError(format!("Unexpected reply: {other:?}"))),
            None => Err(PlaybackError("Tab disconnected".to_string())),
        }
    }

    fn stop(&self) {
        self.send(TutorOutgoingMessage::StopAudio);
    }
}

#[async_trait]
impl LocalSpeech for TabBridge {
    async fn speak(&self, text: &str) {
        let text = text.to_string();
        self.request(
            |request_id| TutorOutgoingMessage::SpeakLocally { request_id, text },
            None,
        )
        .await;
    }

    fn cancel(&self) {
        self.send(TutorOutgoingMessage::CancelSpeech);
    }
}

impl TutorUi for TabBridge {
    fn status(&self, status: SessionStatus, message: &str) {
        self.send(TutorOutgoingMessage::Status {
            status,
            message: message.to_string(),
        });
    }

    fn message(&self, role: Role, text: &str) {
        self.send(TutorOutgoingMessage::Message {
            role,
            content: text.to_string(),
        });
    }

    fn streaming_transcript(&self, delta: &str) {
        self.send(TutorOutgoingMessage::TranscriptDelta {
            delta: delta.to_string(),
        });
    }
}

/// The tab renders realtime segments handed out by the playback sequencer.
///
/// A segment the writer cannot take is refused so the sequencer moves on
/// instead of waiting for a `segment_finished` that will never come.
impl AudioSink for TabBridge {
    fn render(&self, ticket: PlaybackTicket, segment: &PlaybackSegment) -> bool {
        self.send(TutorOutgoingMessage::PlaySegment {
            segment_id: ticket.segment_id(),
            sample_rate: segment.sample_rate(),
            audio: to_base64(&encode_pcm16(segment.samples())),
        })
    }

    fn halt(&self) {
        self.send(TutorOutgoingMessage::StopAudio);
    }
}

/// Realtime events for one tab: audio, transcripts and errors are handled by
/// the dispatcher, everything else is forwarded verbatim.
pub struct TabEventSink {
    dispatcher: Arc<RealtimeEventDispatcher>,
    bridge: Arc<TabBridge>,
    capture_status: StatusCell,
}

impl TabEventSink {
    pub fn new(
        dispatcher: Arc<RealtimeEventDispatcher>,
        bridge: Arc<TabBridge>,
        capture_status: StatusCell,
    ) -> Self {
        Self {
            dispatcher,
            bridge,
            capture_status,
        }
    }
}

impl EventSink for TabEventSink {
    fn deliver(&self, _endpoint: &EndpointId, event: Value) {
        if !self.dispatcher.dispatch(&event) {
            self.bridge
                .send(TutorOutgoingMessage::RealtimeEvent { event });
        }
    }

    fn closed(&self, endpoint: &EndpointId, reason: &str) {
        if !self.dispatcher.owns_playback() {
            debug!(endpoint = %endpoint, "Ignoring close of a superseded realtime session");
            return;
        }
        self.capture_status.set(SessionStatus::Idle);
        self.dispatcher.closed(endpoint, reason);
        self.bridge.send(TutorOutgoingMessage::RealtimeStopped {
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::playback::PlaybackSequencer;
    use serde_json::json;

    fn bridge() -> (Arc<TabBridge>, mpsc::Receiver<TutorMessageRoute>) {
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(TabBridge::new(tx)), rx)
    }

    async fn next_outgoing(rx: &mut mpsc::Receiver<TutorMessageRoute>) -> TutorOutgoingMessage {
        match rx.recv().await {
            Some(TutorMessageRoute::Outgoing(message)) => message,
            other => panic!("Expected outgoing message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let (bridge, mut rx) = bridge();
        let waiter = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.capture().await }
        });

        let TutorOutgoingMessage::CaptureSnapshot { request_id } = next_outgoing(&mut rx).await
        else {
            panic!("Expected capture_snapshot");
        };
        assert!(bridge.resolve(
            request_id,
            HostReply::Snapshot(Some("data:image/png;base64,AAAA".into()))
        ));

        let snapshot = waiter.await.unwrap().expect("snapshot");
        assert_eq!(snapshot.image_url, "data:image/png;base64,AAAA");
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_times_out() {
        let (bridge, mut rx) = bridge();
        let waiter = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.capture().await }
        });
        let _ = next_outgoing(&mut rx).await;

        tokio::time::advance(SNAPSHOT_TIMEOUT + Duration::from_millis(1)).await;
        assert!(waiter.await.unwrap().is_none());
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_playback_error_reported() {
        let (bridge, mut rx) = bridge();
        let waiter = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.play(Bytes::from_static(b"mp3")).await }
        });

        let TutorOutgoingMessage::PlayAudio {
            request_id, format, ..
        } = next_outgoing(&mut rx).await
        else {
            panic!("Expected play_audio");
        };
        assert_eq!(format, "mp3");
        bridge.resolve(
            request_id,
            HostReply::PlaybackFinished(Some("NotAllowedError".into())),
        );

        assert_eq!(
            waiter.await.unwrap(),
            Err(PlaybackError("NotAllowedError".into()))
        );
    }

    #[tokio::test]
    async fn test_close_resolves_waiters() {
        let (bridge, mut rx) = bridge();
        let waiter = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.speak("Hello there").await }
        });
        let TutorOutgoingMessage::SpeakLocally { text, .. } = next_outgoing(&mut rx).await else {
            panic!("Expected speak_locally");
        };
        assert_eq!(text, "Hello there");

        bridge.close();
        waiter.await.unwrap();
        assert!(bridge.capture().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_waiter_clears_entry() {
        let (bridge, mut rx) = bridge();
        let waiter = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.play(Bytes::from_static(b"mp3")).await }
        });
        let TutorOutgoingMessage::PlayAudio { request_id, .. } = next_outgoing(&mut rx).await
        else {
            panic!("Expected play_audio");
        };

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(bridge.pending_requests(), 0);
        assert!(!bridge.resolve(request_id, HostReply::PlaybackFinished(None)));
    }

    #[tokio::test]
    async fn test_segments_rendered_through_tab() {
        let (bridge, mut rx) = bridge();
        let sequencer = PlaybackSequencer::new(bridge.clone());
        let session = sequencer.current_session();
        sequencer.enqueue(session, PlaybackSegment::new(vec![0.25; 4], 24000));
        sequencer.enqueue(session, PlaybackSegment::new(vec![0.5; 4], 24000));

        let TutorOutgoingMessage::PlaySegment {
            segment_id,
            sample_rate,
            ..
        } = next_outgoing(&mut rx).await
        else {
            panic!("Expected play_segment");
        };
        assert_eq!(sample_rate, 24000);
        assert!(rx.try_recv().is_err());

        let ticket = sequencer.rendering().unwrap();
        assert_eq!(ticket.segment_id(), segment_id);
        sequencer.on_segment_complete(ticket);
        assert!(matches!(
            next_outgoing(&mut rx).await,
            TutorOutgoingMessage::PlaySegment { .. }
        ));
    }

    #[tokio::test]
    async fn test_saturated_writer_does_not_stall_playback() {
        let (tx, mut rx) = mpsc::channel(1);
        let bridge = Arc::new(TabBridge::new(tx));
        let sequencer = PlaybackSequencer::new(bridge.clone());
        let session = sequencer.current_session();

        assert!(bridge.send(TutorOutgoingMessage::CancelSpeech));
        assert!(sequencer.enqueue(session, PlaybackSegment::new(vec![0.25; 4], 24000)));
        assert!(sequencer.is_idle());
        assert!(sequencer.rendering().is_none());

        assert!(matches!(
            next_outgoing(&mut rx).await,
            TutorOutgoingMessage::CancelSpeech
        ));
        assert!(sequencer.enqueue(session, PlaybackSegment::new(vec![0.5; 4], 24000)));
        assert!(matches!(
            next_outgoing(&mut rx).await,
            TutorOutgoingMessage::PlaySegment { .. }
        ));
        assert!(sequencer.rendering().is_some());
    }

    #[tokio::test]
    async fn test_superseded_session_close_is_ignored() {
        let (bridge, mut rx) = bridge();
        let sequencer = Arc::new(PlaybackSequencer::new(bridge.clone()));
        let status = StatusCell::new(SessionStatus::Listening);
        let stale = sequencer.current_session();
        sequencer.reset();
        let sink = TabEventSink::new(
            Arc::new(RealtimeEventDispatcher::new(sequencer, stale, bridge.clone())),
            bridge.clone(),
            status.clone(),
        );

        sink.closed(&EndpointId::from("tab"), "Connection closed");
        assert_eq!(status.get(), SessionStatus::Listening);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_superseded_audio_is_not_forwarded() {
        let (bridge, mut rx) = bridge();
        let sequencer = Arc::new(PlaybackSequencer::new(bridge.clone()));
        let stale = sequencer.current_session();
        sequencer.reset();
        let sink = TabEventSink::new(
            Arc::new(RealtimeEventDispatcher::new(sequencer.clone(), stale, bridge.clone())),
            bridge.clone(),
            StatusCell::new(SessionStatus::Idle),
        );

        sink.deliver(
            &EndpointId::from("tab"),
            json!({"type": "response.audio.delta", "response_id": "resp_1", "delta": "AAAAAA=="}),
        );
        assert!(sequencer.is_idle());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unhandled_events_forwarded() {
        let (bridge, mut rx) = bridge();
        let sequencer = Arc::new(PlaybackSequencer::new(bridge.clone()));
        let status = StatusCell::new(SessionStatus::Listening);
        let playback = sequencer.current_session();
        let sink = TabEventSink::new(
            Arc::new(RealtimeEventDispatcher::new(sequencer, playback, bridge.clone())),
            bridge.clone(),
            status.clone(),
        );
        let endpoint = EndpointId::from("tab");

        sink.deliver(&endpoint, json!({"type": "session.created"}));
        assert!(matches!(
            next_outgoing(&mut rx).await,
            TutorOutgoingMessage::RealtimeEvent { .. }
        ));

        sink.deliver(
            &endpoint,
            json!({"type": "response.audio_transcript.delta", "delta": "Hi"}),
        );
        assert!(matches!(
            next_outgoing(&mut rx).await,
            TutorOutgoingMessage::TranscriptDelta { .. }
        ));

        sink.closed(&endpoint, "Connection closed");
        assert_eq!(status.get(), SessionStatus::Idle);
        assert!(matches!(
            next_outgoing(&mut rx).await,
            TutorOutgoingMessage::Status { .. }
        ));
        assert!(matches!(
            next_outgoing(&mut rx).await,
            TutorOutgoingMessage::RealtimeStopped { .. }
        ));
    }
}
