//! Host-side handling of forwarded realtime events.
//!
//! - `response.audio.delta`: decoded and queued on the playback sequencer
//! - `response.audio_transcript.delta`: streamed to the transcript view
//! - `conversation.item.input_audio_transcription.completed`: shown as the student's message
//! - `error`: shown in the status line
//!
//! Everything else is ignored.
//!
//! A dispatcher plays audio under the [`PlaybackSession`] it was handed. Once the
//! sequencer is reset by someone else, the dispatcher's audio is stale and is
//! dropped, so a superseded realtime session can never be heard again.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::base::{EndpointId, EventSink};
use super::openai::config::OPENAI_REALTIME_SAMPLE_RATE;
use super::openai::messages::ServerEvent;
use crate::core::audio::codec::from_base64;
use crate::core::audio::playback::{PlaybackSegment, PlaybackSequencer, PlaybackSession};
use crate::core::status::SessionStatus;
use crate::core::tutor::conversation::Role;
use crate::core::tutor::host::TutorUi;

/// Which playback session this dispatcher may feed, and which response was cut off.
#[derive(Debug)]
struct PlaybackClaim {
    session: PlaybackSession,
    last_response: Option<String>,
    muted_response: Option<String>,
}

/// Routes realtime events to local playback and the tutor UI.
pub struct RealtimeEventDispatcher {
    sequencer: Arc<PlaybackSequencer>,
    ui: Arc<dyn TutorUi>,
    claim: Mutex<PlaybackClaim>,
}

impl RealtimeEventDispatcher {
    /// `session` is the identity returned by the `reset` that gave this
    /// dispatcher the sequencer.
    pub fn new(
        sequencer: Arc<PlaybackSequencer>,
        session: PlaybackSession,
        ui: Arc<dyn TutorUi>,
    ) -> Self {
        Self {
            sequencer,
            ui,
            claim: Mutex::new(PlaybackClaim {
                session,
                last_response: None,
                muted_response: None,
            }),
        }
    }

    /// Cut off the response that is streaming now.
    ///
    /// `session` comes from the `reset` that silenced it. Its remaining chunks
    /// are dropped; later responses play under `session`.
    pub fn interrupt(&self, session: PlaybackSession) {
        let mut claim = self.claim.lock();
        claim.muted_response = claim.last_response.take();
        claim.session = session;
    }

    /// Whether this dispatcher still owns the sequencer.
    pub fn owns_playback(&self) -> bool {
        self.claim.lock().session == self.sequencer.current_session()
    }

    /// Handle one event. Returns `true` if it was consumed here.
    ///
    /// Audio deltas are always consumed, including stale or undecodable ones.
    pub fn dispatch(&self, event: &Value) -> bool {
        match ServerEvent::from_value(event) {
            Some(ServerEvent::AudioDelta { response_id, delta }) => {
                self.play_chunk(&response_id, &delta);
                true
            }
            Some(ServerEvent::AudioTranscriptDelta { delta, .. }) => {
                self.ui.streaming_transcript(&delta);
                true
            }
            Some(ServerEvent::TranscriptionCompleted { transcript, .. }) => {
                self.ui.message(Role::User, &transcript);
                true
            }
            Some(ServerEvent::Error { error }) => {
                warn!("Realtime provider error: {}", error.message);
                self.ui
                    .status(SessionStatus::Idle, &format!("Error: {}", error.message));
                true
            }
            _ => false,
        }
    }

    fn play_chunk(&self, response_id: &str, delta: &str) {
        let session = {
            let mut claim = self.claim.lock();
            if !response_id.is_empty() && claim.muted_response.as_deref() == Some(response_id) {
                debug!(response_id, "Dropping audio of interrupted response");
                return;
            }
            if !response_id.is_empty() {
                claim.last_response = Some(response_id.to_string());
            }
            claim.session
        };
        let pcm = match from_base64(delta) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("Dropping undecodable audio chunk: {}", e);
                return;
            }
        };
        let segment = PlaybackSegment::from_pcm16(&pcm, OPENAI_REALTIME_SAMPLE_RATE);
        if segment.is_empty() {
            return;
        }
        let queued = self.sequencer.enqueue(session, segment);
        debug!(bytes = pcm.len(), queued, "Realtime audio chunk");
    }
}

impl EventSink for RealtimeEventDispatcher {
    fn deliver(&self, _endpoint: &EndpointId, event: Value) {
        self.dispatch(&event);
    }

    fn closed(&self, endpoint: &EndpointId, reason: &str) {
        if !self.owns_playback() {
            debug!(endpoint = %endpoint, "Superseded realtime session closed");
            return;
        }
        self.sequencer.reset();
        self.ui.status(SessionStatus::Idle, &format!("Error: {reason}"));
    }
}
