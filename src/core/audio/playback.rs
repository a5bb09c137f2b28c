//! Sequential playback of streamed audio segments.
//!
//! Segments arrive in bursts from the network and are rendered one at a time, in
//! arrival order, on a single [`AudioSink`]. A segment is handed to the sink only
//! after the previous one reported completion through its [`PlaybackTicket`].
//!
//! Every segment is tagged with the [`PlaybackSession`] that was active when it
//! was enqueued. [`PlaybackSequencer::reset`] discards everything, halts the
//! sink and mints a new session; work tagged with an older session is dropped on
//! arrival and its completions are ignored.
//!
//! A sink that refuses a segment (its output is saturated or gone) does not stall
//! the queue: the segment is skipped and the next one is tried.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::codec::decode_pcm16;
use crate::core::status::{SessionStatus, StatusCell};

/// Segments allowed to wait behind the one rendering.
pub const MAX_QUEUED_SEGMENTS: usize = 256;

/// Identity of the playback owner. Ownership moves to whoever called `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackSession(u64);

/// Handle identifying one rendering segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackTicket {
    session: PlaybackSession,
    segment: u64,
}

impl PlaybackTicket {
    pub fn session(&self) -> PlaybackSession {
        self.session
    }

    pub fn segment_id(&self) -> u64 {
        self.segment
    }
}

/// A decoded block of mono audio waiting for output.
#[derive(Debug, Clone)]
pub struct PlaybackSegment {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PlaybackSegment {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Decode a PCM16 little-endian chunk.
    pub fn from_pcm16(bytes: &[u8], sample_rate: u32) -> Self {
        Self::new(decode_pcm16(bytes), sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Output device driven by the sequencer.
///
/// Every method is called while the sequencer holds its lock, so an
/// implementation must not call back into the sequencer from inside them.
/// Completion is reported later through [`PlaybackSequencer::on_segment_complete`].
pub trait AudioSink: Send + Sync {
    /// Start rendering one segment. Returns `false` if the output did not take it,
    /// in which case no completion will ever be reported for `ticket`.
    fn render(&self, ticket: PlaybackTicket, segment: &PlaybackSegment) -> bool;

    /// Stop whatever is rendering right now.
    fn halt(&self);

    /// Nothing renders any more: the queue drained or playback was reset.
    fn idle(&self) {}
}

/// Holds `Speaking` on an endpoint's status while the wrapped sink renders.
///
/// Capture stays gated for as long as tutor audio is playing. When playback
/// goes idle the status drops back to `Idle`, unless something else changed it
/// in the meantime.
pub struct SpeakingSink {
    inner: Arc<dyn AudioSink>,
    status: StatusCell,
}

impl SpeakingSink {
    pub fn new(inner: Arc<dyn AudioSink>, status: StatusCell) -> Self {
        Self { inner, status }
    }
}

impl AudioSink for SpeakingSink {
    fn render(&self, ticket: PlaybackTicket, segment: &PlaybackSegment) -> bool {
        self.status.set(SessionStatus::Speaking);
        self.inner.render(ticket, segment)
    }

    fn halt(&self) {
        self.inner.halt();
    }

    fn idle(&self) {
        self.status
            .transition(SessionStatus::Speaking, SessionStatus::Idle);
        self.inner.idle();
    }
}

/// Notifications for observers of the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    SegmentStarted(PlaybackTicket),
    SegmentCompleted(PlaybackTicket),
    /// The sink refused the segment; it was skipped.
    SegmentDropped(PlaybackTicket),
    /// The queue drained after the last segment completed.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackPhase {
    Idle,
    Rendering(PlaybackTicket),
}

struct SequencerState {
    session: PlaybackSession,
    next_segment: u64,
    queue: VecDeque<(u64, PlaybackSegment)>,
    phase: PlaybackPhase,
}

/// FIFO playback sequencer.
pub struct PlaybackSequencer {
    state: Mutex<SequencerState>,
    sink: Arc<dyn AudioSink>,
    events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
}

impl PlaybackSequencer {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            state: Mutex::new(SequencerState {
                session: PlaybackSession(0),
                next_segment: 0,
                queue: VecDeque::new(),
                phase: PlaybackPhase::Idle,
            }),
            sink,
            events: None,
        }
    }

    /// Create a sequencer that also publishes [`PlaybackEvent`]s.
    pub fn with_events(sink: Arc<dyn AudioSink>) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sequencer = Self::new(sink);
        sequencer.events = Some(tx);
        (sequencer, rx)
    }

    /// The identity new segments must carry to be accepted.
    pub fn current_session(&self) -> PlaybackSession {
        self.state.lock().session
    }

    pub fn is_idle(&self) -> bool {
        self.state.lock().phase == PlaybackPhase::Idle
    }

    /// Number of segments waiting behind the one rendering.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Ticket of the segment rendering right now.
    pub fn rendering(&self) -> Option<PlaybackTicket> {
        match self.state.lock().phase {
            PlaybackPhase::Rendering(ticket) => Some(ticket),
            PlaybackPhase::Idle => None,
        }
    }

    /// Append a segment; starts it immediately when nothing is rendering.
    ///
    /// Returns `false` when the segment belongs to a superseded session, is empty,
    /// or the queue already holds [`MAX_QUEUED_SEGMENTS`].
    pub fn enqueue(&self, session: PlaybackSession, segment: PlaybackSegment) -> bool {
        let mut state = self.state.lock();
        if session != state.session {
            debug!("Dropping audio segment from superseded playback session");
            return false;
        }
        if segment.is_empty() {
            return false;
        }
        if state.queue.len() >= MAX_QUEUED_SEGMENTS {
            warn!(queued = state.queue.len(), "Playback queue full, dropping segment");
            return false;
        }

        let id = state.next_segment;
        state.next_segment += 1;
        state.queue.push_back((id, segment));
        trace!(segment = id, queued = state.queue.len(), "Audio segment queued");

        if state.phase == PlaybackPhase::Idle {
            self.advance(&mut state);
        }
        true
    }

    /// Report that the segment identified by `ticket` finished rendering.
    ///
    /// Stale tickets (older session, or not the rendering segment) are ignored.
    pub fn on_segment_complete(&self, ticket: PlaybackTicket) {
        let mut state = self.state.lock();
        if state.phase != PlaybackPhase::Rendering(ticket) {
            trace!(segment = ticket.segment, "Ignoring stale playback completion");
            return;
        }
        self.emit(PlaybackEvent::SegmentCompleted(ticket));
        state.phase = PlaybackPhase::Idle;
        self.advance(&mut state);
    }

    /// Discard queued and rendering audio, returning the new active session.
    pub fn reset(&self) -> PlaybackSession {
        let mut state = self.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        state.session = PlaybackSession(state.session.0 + 1);
        if let PlaybackPhase::Rendering(_) = state.phase {
            self.sink.halt();
            state.phase = PlaybackPhase::Idle;
            self.emit(PlaybackEvent::Idle);
            self.sink.idle();
        }
        debug!(dropped, "Playback reset");
        state.session
    }

    fn advance(&self, state: &mut SequencerState) {
        while let Some((id, segment)) = state.queue.pop_front() {
            let ticket = PlaybackTicket {
                session: state.session,
                segment: id,
            };
            state.phase = PlaybackPhase::Rendering(ticket);
            self.emit(PlaybackEvent::SegmentStarted(ticket));
            if self.sink.render(ticket, &segment) {
                return;
            }
            warn!(segment = id, "Audio output refused segment, skipping it");
            self.emit(PlaybackEvent::SegmentDropped(ticket));
        }
        state.phase = PlaybackPhase::Idle;
        self.emit(PlaybackEvent::Idle);
        self.sink.idle();
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
