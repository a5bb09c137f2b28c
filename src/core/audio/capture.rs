//! Microphone capture framing.
//!
//! The capture device delivers float samples in whatever chunk size it likes.
//! [`CapturePipeline`] re-frames them into fixed [`AudioFrame`]s of
//! [`FRAME_SAMPLES`] samples and, for every complete frame, checks the shared
//! [`StatusCell`]. Frames are encoded to PCM16 and forwarded to the active
//! [`FrameSink`] only while the endpoint is listening; otherwise they are dropped.
//! The audio graph is never torn down on status changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use super::codec::encode_pcm16;
use crate::core::status::StatusCell;

/// Capture sample rate shared with the realtime protocol.
pub const CAPTURE_SAMPLE_RATE: u32 = 24_000;

/// Samples per capture frame.
pub const FRAME_SAMPLES: usize = 4096;

/// Settings requested from the capture device.
///
/// Devices that cannot honor them keep running with whatever they support.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub channel_count: u16,
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    /// Samples per frame the device should aim for
    pub frame_samples: usize,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            channel_count: 1,
            sample_rate: CAPTURE_SAMPLE_RATE,
            echo_cancellation: true,
            noise_suppression: true,
            frame_samples: FRAME_SAMPLES,
        }
    }
}

/// One fixed-size block of mono samples.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn to_pcm16(&self) -> Bytes {
        Bytes::from(encode_pcm16(&self.samples))
    }
}

/// Parse raw little-endian f32 samples as sent by a browser capture node.
pub fn samples_from_f32_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Destination for encoded capture frames.
///
/// Called from the capture callback; implementations must not block.
pub trait FrameSink: Send + Sync {
    /// Returns `false` when the frame was dropped.
    fn deliver(&self, pcm: Bytes) -> bool;
}

impl FrameSink for mpsc::Sender<Bytes> {
    fn deliver(&self, pcm: Bytes) -> bool {
        self.try_send(pcm).is_ok()
    }
}

/// Collects PCM16 frames for a batch recognizer.
#[derive(Debug, Default)]
pub struct BufferedRecognizerSink {
    buffer: Mutex<BytesMut>,
}

impl BufferedRecognizerSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything captured so far.
    pub fn take(&self) -> Bytes {
        self.buffer.lock().split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for BufferedRecognizerSink {
    fn deliver(&self, pcm: Bytes) -> bool {
        self.buffer.lock().extend_from_slice(&pcm);
        true
    }
}

/// Counters for forwarded and dropped frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub forwarded: u64,
    pub dropped: u64,
}

/// Status-gated re-framing capture pipeline.
pub struct CapturePipeline {
    status: StatusCell,
    frame_samples: usize,
    sample_rate: u32,
    pending: Mutex<Vec<f32>>,
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl CapturePipeline {
    pub fn new(status: StatusCell) -> Self {
        Self::with_constraints(status, CaptureConstraints::default())
    }

    pub fn with_constraints(status: StatusCell, constraints: CaptureConstraints) -> Self {
        Self {
            status,
            frame_samples: constraints.frame_samples.max(1),
            sample_rate: constraints.sample_rate,
            pending: Mutex::new(Vec::with_capacity(constraints.frame_samples)),
            sink: RwLock::new(None),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Route frames to `sink` from now on.
    pub fn set_sink(&self, sink: Arc<dyn FrameSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn clear_sink(&self) {
        *self.sink.write() = None;
        self.pending.lock().clear();
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Feed raw device samples of any length.
    pub fn push_samples(&self, samples: &[f32]) {
        let frames = {
            let mut pending = self.pending.lock();
            pending.extend_from_slice(samples);
            let complete = pending.len() / self.frame_samples;
            let mut frames = Vec::with_capacity(complete);
            for _ in 0..complete {
                let rest = pending.split_off(self.frame_samples);
                let frame = std::mem::replace(&mut *pending, rest);
                frames.push(AudioFrame::new(frame, self.sample_rate));
            }
            frames
        };

        for frame in frames {
            self.on_frame(&frame);
        }
    }

    /// Handle one complete frame. Returns `true` when it was forwarded.
    pub fn on_frame(&self, frame: &AudioFrame) -> bool {
        if !self.status.get().forwards_frames() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let sink = self.sink.read().clone();
        let delivered = match sink {
            Some(sink) => sink.deliver(frame.to_pcm16()),
            None => false,
        };

        if delivered {
            self.forwarded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Capture frame dropped by sink");
        }
        delivered
    }
}
