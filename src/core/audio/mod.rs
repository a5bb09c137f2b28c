//! Audio plumbing shared by both tutoring modes.
//!
//! - `codec`: float samples, PCM16 and base64 conversions
//! - `playback`: FIFO sequencer that renders one segment at a time
//! - `capture`: status-gated re-framing of microphone input

pub mod capture;
pub mod codec;
pub mod playback;

pub use capture::{
    AudioFrame, BufferedRecognizerSink, CAPTURE_SAMPLE_RATE, CaptureConstraints, CapturePipeline,
    CaptureStats, FRAME_SAMPLES, FrameSink, samples_from_f32_le,
};
pub use codec::{decode_pcm16, encode_pcm16, from_base64, to_base64};
pub use playback::{
    AudioSink, MAX_QUEUED_SEGMENTS, PlaybackEvent, PlaybackSegment, PlaybackSequencer,
    PlaybackSession, PlaybackTicket, SpeakingSink,
};
