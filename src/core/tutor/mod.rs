//! Turn-based tutoring and the state shared with realtime mode.
//!
//! - `page`: what the student is looking at
//! - `conversation`: ordered turn log
//! - `prompt`: instruction text for both modes
//! - `host`: collaborators implemented by the host
//! - `controller`: the listen / think / speak loop

pub mod controller;
pub mod conversation;
pub mod host;
pub mod page;
pub mod prompt;

pub use controller::{TurnController, TutorError, TutorServices, TutorSettings};
pub use conversation::{Conversation, Role, Turn};
pub use host::{LocalSpeech, PlaybackError, RecognitionError, SnapshotSource, SpeechOutput, TutorUi};
pub use page::{PAGE_UNREADABLE_MESSAGE, PageContent, VisualSnapshot};
