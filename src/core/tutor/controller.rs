//! Turn-based tutoring: listen, look at the screen, answer, speak.
//!
//! Status moves `idle -> listening -> thinking -> speaking -> idle`. Each turn
//! runs under an epoch and a cancellation token. [`TurnController::stop_all_audio`]
//! bumps the epoch and cancels the token, and every later step of a turn first
//! checks that its epoch is still current, so a superseded turn never touches
//! the status or the conversation again.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::conversation::{Conversation, Role, Turn};
use super::host::{LocalSpeech, RecognitionError, SnapshotSource, SpeechOutput, TutorUi};
use super::page::{PAGE_UNREADABLE_MESSAGE, PageContent};
use super::prompt::{FALLBACK_GREETING, GREETING_REQUEST, build_greeting_prompt, build_turn_prompt};
use crate::core::services::speech::{SpeechRequest, SpeechSynthesizer, SynthesisOutcome};
use crate::core::services::vision::VisionChat;
use crate::core::status::{SessionStatus, StatusCell};

pub const GREETING_NOTICE: &str = "👀 Let me see what you're learning...";
pub const LISTENING_NOTICE: &str = "🎤 I'm listening! Ask your question...";
pub const LOOKING_NOTICE: &str = "👀 Let me see what you're looking at...";
pub const THINKING_NOTICE: &str = "🤔 Thinking about your question...";
pub const SPEAKING_NOTICE: &str = "🗣️ Listen carefully...";
pub const READY_NOTICE: &str = "🎉 Ready for your next question!";
pub const NO_SPEECH_NOTICE: &str = "No speech detected. Try again!";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TutorError {
    #[error("{}", PAGE_UNREADABLE_MESSAGE)]
    PageContentUnavailable,
}

/// Tutor settings chosen when the session starts.
#[derive(Debug, Clone, Default)]
pub struct TutorSettings {
    pub system_prompt: String,
    /// Cloud voice; `None` uses the synthesizer default
    pub voice: Option<String>,
}

/// Everything the controller talks to.
#[derive(Clone)]
pub struct TutorServices {
    pub vision: Arc<dyn VisionChat>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub output: Arc<dyn SpeechOutput>,
    pub local: Arc<dyn LocalSpeech>,
    pub ui: Arc<dyn TutorUi>,
}

struct TurnState {
    epoch: u64,
    cancel: CancellationToken,
    conversation: Conversation,
    page: PageContent,
}

/// Identity of one in-flight turn.
struct TurnGuard {
    epoch: u64,
    cancel: CancellationToken,
}

/// Drives one endpoint's turn-based conversation.
pub struct TurnController {
    status: StatusCell,
    state: Mutex<TurnState>,
    settings: TutorSettings,
    services: TutorServices,
}

impl TurnController {
    pub fn new(settings: TutorSettings, services: TutorServices) -> Self {
        Self {
            status: StatusCell::default(),
            state: Mutex::new(TurnState {
                epoch: 0,
                cancel: CancellationToken::new(),
                conversation: Conversation::new(),
                page: PageContent::default(),
            }),
            settings,
            services,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.get()
    }

    /// Shared status cell, for gating audio capture.
    pub fn status_cell(&self) -> StatusCell {
        self.status.clone()
    }

    /// Copy of the conversation so far.
    pub fn conversation(&self) -> Conversation {
        self.state.lock().conversation.clone()
    }

    /// Start a fresh session on `page` and speak a greeting.
    ///
    /// With a screenshot the greeting is generated from what the student sees;
    /// otherwise, or if that fails, a fixed greeting is used.
    pub async fn begin(&self, page: PageContent) -> Result<(), TutorError> {
        let page = page.normalized();
        if !page.is_readable() {
            return Err(TutorError::PageContentUnavailable);
        }

        self.stop_all_audio();
        let guard = {
            let mut state = self.state.lock();
            state.conversation.clear();
            state.page = page.clone();
            self.status.set(SessionStatus::Thinking);
            Self::guard(&state)
        };
        info!(title = %page.title, "Starting turn-based session");
        self.services
            .ui
            .status(SessionStatus::Thinking, GREETING_NOTICE);

        let greeting = match page.snapshot() {
            Some(snapshot) => {
                let prompt = build_greeting_prompt(&self.settings.system_prompt, &page);
                let turns = [Turn::user(GREETING_REQUEST, Some(snapshot))];
                match self
                    .cancellable(&guard, self.services.vision.chat(&prompt, &turns))
                    .await
                {
                    None => return Ok(()),
                    Some(Ok(text)) if !text.trim().is_empty() => text,
                    Some(Ok(_)) => FALLBACK_GREETING.to_string(),
                    Some(Err(e)) => {
                        warn!("Greeting generation failed: {}", e);
                        FALLBACK_GREETING.to_string()
                    }
                }
            }
            None => FALLBACK_GREETING.to_string(),
        };

        let committed = self.commit(&guard, |state| {
            state.conversation.push(Turn::assistant(greeting.as_str()));
        });
        if committed.is_none() {
            return Ok(());
        }
        self.services.ui.message(Role::Assistant, &greeting);
        self.speak(&guard, &greeting).await;
        Ok(())
    }

    /// `idle -> listening`. Ignored in every other status.
    pub fn start_listening(&self) -> bool {
        let started = {
            let _state = self.state.lock();
            self.status
                .transition(SessionStatus::Idle, SessionStatus::Listening)
        };
        if started {
            self.services
                .ui
                .status(SessionStatus::Listening, LISTENING_NOTICE);
        } else {
            debug!(status = %self.status.get(), "Ignoring start_listening");
        }
        started
    }

    /// Recognition ended without text: `listening -> idle` with a notice.
    pub fn on_recognition_error(&self, error: RecognitionError) {
        let stopped = {
            let _state = self.state.lock();
            self.status
                .transition(SessionStatus::Listening, SessionStatus::Idle)
        };
        if !stopped {
            return;
        }
        let notice = match &error {
            RecognitionError::NoSpeech => NO_SPEECH_NOTICE.to_string(),
            RecognitionError::Recognizer(detail) => format!("Error: {detail}"),
        };
        self.services.ui.status(SessionStatus::Idle, &notice);
    }

    /// Run one full turn for the recognized `text`. Only acts while listening.
    pub async fn on_transcript(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            self.on_recognition_error(RecognitionError::NoSpeech);
            return;
        }

        let guard = {
            let state = self.state.lock();
            if !self
                .status
                .transition(SessionStatus::Listening, SessionStatus::Thinking)
            {
                debug!(status = %self.status.get(), "Ignoring transcript");
                return;
            }
            Self::guard(&state)
        };
        let ui = &self.services.ui;
        ui.status(SessionStatus::Thinking, LOOKING_NOTICE);
        ui.message(Role::User, text);

        let Some(snapshot) = self
            .cancellable(&guard, self.services.snapshots.capture())
            .await
        else {
            return;
        };

        let Some((prompt, turns)) = self.commit(&guard, |state| {
            // A failed capture falls back to the screenshot taken at session start.
            let snapshot = snapshot.or_else(|| state.page.snapshot());
            state.conversation.push(Turn::user(text, snapshot));
            (
                build_turn_prompt(&self.settings.system_prompt, &state.page),
                state.conversation.turns().to_vec(),
            )
        }) else {
            return;
        };
        ui.status(SessionStatus::Thinking, THINKING_NOTICE);

        let Some(reply) = self
            .cancellable(&guard, self.services.vision.chat(&prompt, &turns))
            .await
        else {
            return;
        };

        match reply {
            Ok(reply) => {
                let committed = self.commit(&guard, |state| {
                    state.conversation.push(Turn::assistant(reply.as_str()));
                });
                if committed.is_none() {
                    return;
                }
                ui.message(Role::Assistant, &reply);
                self.speak(&guard, &reply).await;
            }
            Err(e) => {
                warn!("Vision chat failed: {}", e);
                if self
                    .commit(&guard, |_| self.status.set(SessionStatus::Idle))
                    .is_none()
                {
                    return;
                }
                let notice = format!("Sorry, I had trouble with that: {e}. Please try again.");
                ui.message(Role::System, &notice);
                ui.status(SessionStatus::Idle, &notice);
            }
        }
    }

    /// Halt all tutor audio, cancel any in-flight turn and force `idle`.
    pub fn stop_all_audio(&self) {
        {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.cancel.cancel();
            state.cancel = CancellationToken::new();
            self.status.set(SessionStatus::Idle);
        }
        self.services.output.stop();
        self.services.local.cancel();
    }

    /// End the session. History is not kept.
    pub fn end(&self) {
        self.stop_all_audio();
        self.state.lock().conversation.clear();
        info!("Turn-based session ended");
    }

    // =========================================================================
    // Turn plumbing
    // =========================================================================

    fn guard(state: &TurnState) -> TurnGuard {
        TurnGuard {
            epoch: state.epoch,
            cancel: state.cancel.clone(),
        }
    }

    /// Run `f` on the state only if `guard` is still the current turn.
    fn commit<R>(&self, guard: &TurnGuard, f: impl FnOnce(&mut TurnState) -> R) -> Option<R> {
        let mut state = self.state.lock();
        if state.epoch != guard.epoch {
            return None;
        }
        Some(f(&mut state))
    }

    /// Await `fut` unless the turn is cancelled first.
    async fn cancellable<F: Future>(&self, guard: &TurnGuard, fut: F) -> Option<F::Output> {
        tokio::select! {
            _ = guard.cancel.cancelled() => None,
            output = fut => Some(output),
        }
    }

    /// `speaking`, cloud synthesis with silent local fallback, then `idle`.
    async fn speak(&self, guard: &TurnGuard, text: &str) {
        if self
            .commit(guard, |_| self.status.set(SessionStatus::Speaking))
            .is_none()
        {
            return;
        }
        self.services
            .ui
            .status(SessionStatus::Speaking, SPEAKING_NOTICE);

        let request = SpeechRequest::new(text, self.settings.voice.as_deref());
        let Some(outcome) = self
            .cancellable(guard, self.services.speech.synthesize(&request))
            .await
        else {
            return;
        };

        match outcome {
            SynthesisOutcome::Audio(audio) => {
                match self.cancellable(guard, self.services.output.play(audio)).await {
                    None => return,
                    Some(Err(e)) => debug!("Ignoring playback failure: {}", e),
                    Some(Ok(())) => {}
                }
            }
            SynthesisOutcome::Unavailable(reason) => {
                debug!("Cloud speech unavailable ({}), using local speech", reason);
                if self
                    .cancellable(guard, self.services.local.speak(text))
                    .await
                    .is_none()
                {
                    return;
                }
            }
        }

        if self
            .commit(guard, |_| self.status.set(SessionStatus::Idle))
            .is_some()
        {
            self.services.ui.status(SessionStatus::Idle, READY_NOTICE);
        }
    }
}
