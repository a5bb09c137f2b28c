pub mod audio;
pub mod realtime;
pub mod services;
pub mod status;
pub mod tutor;

pub use audio::{CapturePipeline, PlaybackSegment, PlaybackSequencer};
pub use realtime::{EndpointId, RealtimeError, RealtimeResult, RealtimeStartConfig, SessionRegistry};
pub use services::{ServiceError, SpeechSynthesizer, Transcriber, VisionChat};
pub use status::{SessionStatus, StatusCell};
pub use tutor::{TurnController, TutorServices, TutorSettings};
