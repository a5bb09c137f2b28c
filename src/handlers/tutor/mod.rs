//! Tutor WebSocket handlers
//!
//! One `/tutor` socket per browser tab. The tab can run either mode:
//!
//! ## Realtime mode
//!
//! - **start_realtime** / **stop_realtime**: open or close the tab's realtime session
//! - **realtime_audio**, **realtime_message**: relayed upstream
//! - Binary microphone frames: relayed only between **start_talking** and
//!   **stop_talking**, and never while a **play_segment** is rendering
//! - Server answers with **realtime_started**, **play_segment**, **transcript_delta**,
//!   **message**, **realtime_event** and **realtime_stopped**
//!
//! ## Turn-based mode
//!
//! - **start_tutor**: greet the student for the current page
//! - **start_talking** / **stop_talking** or **transcript**: one question per turn
//! - Server asks the tab for **capture_snapshot**, **play_audio** and **speak_locally**,
//!   and the tab answers with **snapshot** and **playback_finished**
//! - **stop_audio**, **stop_tutor**: interrupt or end the session

pub mod bridge;
mod handler;
pub mod messages;

pub use handler::tutor_handler;
