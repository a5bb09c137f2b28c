//! Tutor WebSocket handler
//!
//! One socket is one endpoint. The handler owns the endpoint's audio plumbing
//! (playback sequencer, capture pipelines) and its turn controller, and
//! relays realtime sessions through the shared [`SessionRegistry`].
//!
//! Long-running work (realtime connects, turns, transcription) runs on spawned
//! tasks so the socket keeps reading replies the tutor is waiting for.
//!
//! [`SessionRegistry`]: crate::core::realtime::SessionRegistry

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use super::bridge::{HostReply, TabBridge, TabEventSink};
use super::messages::{
    StartSession, TutorIncomingMessage, TutorMessageRoute, TutorOutgoingMessage,
};
use crate::core::audio::capture::{
    BufferedRecognizerSink, CAPTURE_SAMPLE_RATE, CapturePipeline, samples_from_f32_le,
};
use crate::core::audio::codec::from_base64;
use crate::core::audio::playback::{PlaybackSequencer, SpeakingSink};
use crate::core::realtime::{
    EndpointId, RealtimeEventDispatcher, RealtimeStartConfig, RegistryRelay,
};
use crate::core::services::{AudioUpload, Transcriber};
use crate::core::status::{SessionStatus, StatusCell};
use crate::core::tutor::host::RecognitionError;
use crate::core::tutor::page::PAGE_UNREADABLE_MESSAGE;
use crate::core::tutor::{TurnController, TutorServices, TutorSettings};
use crate::state::AppState;

/// Channel buffer between the handler and the socket writer
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (16 MB, screenshots travel inline)
const MAX_WS_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum WebSocket message size (16 MB)
const MAX_WS_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// How often an idle connection is checked
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum idle time before the connection is closed
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Tutor WebSocket handler
///
/// Upgrades the HTTP connection to the `/tutor` protocol described in
/// [`super::messages`].
pub async fn tutor_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("Tutor WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_tutor_socket(socket, state))
}

/// Handle one tab's connection until it closes
async fn handle_tutor_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let endpoint = EndpointId::generate();
    info!(endpoint = %endpoint, "Tutor WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<TutorMessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let result = match route {
                TutorMessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                TutorMessageRoute::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let mut tab = TabSession::new(endpoint.clone(), app_state, message_tx.clone());
    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        if !tab.process_message(msg) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(endpoint = %endpoint, "Tutor WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(endpoint = %endpoint, "Tutor WebSocket closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    warn!(
                        endpoint = %endpoint,
                        "Tutor WebSocket idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    tab.bridge.send(TutorOutgoingMessage::error(
                        "idle_timeout",
                        "Connection closed due to inactivity",
                    ));
                    let _ = message_tx.send(TutorMessageRoute::Close).await;
                    break;
                }
            }
        }
    }

    tab.shutdown();
    sender_task.abort();
    info!(endpoint = %endpoint, "Tutor WebSocket connection terminated");
}

/// Turn-based session state for one tab.
struct ActiveTutor {
    controller: Arc<TurnController>,
    capture: CapturePipeline,
    recorder: Arc<BufferedRecognizerSink>,
    transcriber: Arc<dyn Transcriber>,
}

/// Everything one tab owns.
struct TabSession {
    endpoint: EndpointId,
    state: Arc<AppState>,
    bridge: Arc<TabBridge>,
    sequencer: Arc<PlaybackSequencer>,
    /// Realtime push-to-talk: `listening` between `start_talking` and
    /// `stop_talking`, `speaking` while tutor audio renders
    realtime_status: StatusCell,
    realtime_capture: CapturePipeline,
    /// Feeds the sequencer for the most recent realtime session
    realtime_dispatcher: Option<Arc<RealtimeEventDispatcher>>,
    tutor: Option<ActiveTutor>,
}

impl TabSession {
    fn new(
        endpoint: EndpointId,
        state: Arc<AppState>,
        outgoing: mpsc::Sender<TutorMessageRoute>,
    ) -> Self {
        let bridge = Arc::new(TabBridge::new(outgoing));
        let realtime_status = StatusCell::default();
        let sequencer = Arc::new(PlaybackSequencer::new(Arc::new(SpeakingSink::new(
            bridge.clone(),
            realtime_status.clone(),
        ))));
        let realtime_capture = CapturePipeline::new(realtime_status.clone());
        realtime_capture.set_sink(Arc::new(RegistryRelay::new(
            state.registry.clone(),
            endpoint.clone(),
        )));

        Self {
            endpoint,
            state,
            bridge,
            sequencer,
            realtime_status,
            realtime_capture,
            realtime_dispatcher: None,
            tutor: None,
        }
    }

    /// Handle one frame. Returns `false` when the connection should close.
    fn process_message(&mut self, msg: Message) -> bool {
        match msg {
            Message::Text(text) => {
                let incoming: TutorIncomingMessage = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Failed to parse tutor message: {}", e);
                        self.bridge.send(TutorOutgoingMessage::error(
                            "parse_error",
                            format!("Invalid message format: {e}"),
                        ));
                        return true;
                    }
                };

                if let Err(e) = incoming.validate_size() {
                    warn!("Message validation failed: {}", e);
                    self.bridge
                        .send(TutorOutgoingMessage::error("validation_error", e.to_string()));
                    return true;
                }

                self.handle_incoming(incoming);
                true
            }
            Message::Binary(data) => {
                let samples = samples_from_f32_le(&data);
                self.realtime_capture.push_samples(&samples);
                if let Some(tutor) = &self.tutor {
                    tutor.capture.push_samples(&samples);
                }
                true
            }
            Message::Ping(_) | Message::Pong(_) => true,
            Message::Close(_) => {
                info!(endpoint = %self.endpoint, "Tutor WebSocket close received");
                false
            }
        }
    }

    fn handle_incoming(&mut self, msg: TutorIncomingMessage) {
        match msg {
            TutorIncomingMessage::StartRealtime(start) => self.start_realtime(start),
            TutorIncomingMessage::StopRealtime => self.stop_realtime(),
            TutorIncomingMessage::RealtimeAudio { audio } => match from_base64(&audio) {
                Ok(pcm) => {
                    if !self.state.registry.send_audio(&self.endpoint, &pcm) {
                        debug!("No open realtime session, dropping audio");
                    }
                }
                Err(e) => {
                    self.bridge.send(TutorOutgoingMessage::error(
                        "invalid_audio",
                        format!("Audio is not valid base64: {e}"),
                    ));
                }
            },
            TutorIncomingMessage::RealtimeMessage { message } => {
                if !self.state.registry.send(&self.endpoint, &message) {
                    debug!("No open realtime session, dropping message");
                }
            }
            TutorIncomingMessage::StartTutor(start) => self.start_tutor(start),
            TutorIncomingMessage::StartTalking => {
                if let Some(tutor) = &self.tutor {
                    tutor.recorder.take();
                    tutor.controller.start_listening();
                } else if self.realtime_open() {
                    if !self
                        .realtime_status
                        .transition(SessionStatus::Idle, SessionStatus::Listening)
                    {
                        debug!(status = %self.realtime_status.get(), "Ignoring start_talking");
                    }
                }
            }
            TutorIncomingMessage::StopTalking => self.stop_talking(),
            TutorIncomingMessage::Transcript { text } => {
                if let Some(tutor) = &self.tutor {
                    let controller = tutor.controller.clone();
                    tokio::spawn(async move { controller.on_transcript(&text).await });
                }
            }
            TutorIncomingMessage::RecognitionError { error } => {
                if let Some(tutor) = &self.tutor {
                    tutor
                        .controller
                        .on_recognition_error(RecognitionError::from_code(&error));
                }
            }
            TutorIncomingMessage::Snapshot {
                request_id,
                screenshot,
            } => {
                self.bridge
                    .resolve(request_id, HostReply::Snapshot(screenshot));
            }
            TutorIncomingMessage::PlaybackFinished { request_id, error } => {
                self.bridge
                    .resolve(request_id, HostReply::PlaybackFinished(error));
            }
            TutorIncomingMessage::SegmentFinished { segment_id } => {
                if let Some(ticket) = self.sequencer.rendering()
                    && ticket.segment_id() == segment_id
                {
                    self.sequencer.on_segment_complete(ticket);
                }
            }
            TutorIncomingMessage::StopAudio => {
                let fresh = self.sequencer.reset();
                if let Some(dispatcher) = &self.realtime_dispatcher {
                    dispatcher.interrupt(fresh);
                }
                if let Some(tutor) = &self.tutor {
                    tutor.controller.stop_all_audio();
                }
            }
            TutorIncomingMessage::StopTutor => self.end_tutor(),
        }
    }

    // =========================================================================
    // Realtime mode
    // =========================================================================

    fn start_realtime(&mut self, start: StartSession) {
        self.end_tutor();

        let api_key = match self.state.config.openai_api_key(start.api_key.as_deref()) {
            Ok(key) => key,
            Err(message) => {
                self.bridge
                    .send(TutorOutgoingMessage::error("invalid_configuration", message));
                return;
            }
        };
        let config = &self.state.config;
        let start_config = RealtimeStartConfig::new(api_key, start.page)
            .with_url(config.realtime_url.as_str())
            .with_model(config.realtime_model.as_str())
            .with_system_prompt(
                start
                    .system_prompt
                    .unwrap_or_else(|| config.system_prompt.clone()),
            )
            .with_voice(start.voice);

        self.realtime_status.set(SessionStatus::Idle);
        let playback = self.sequencer.reset();
        let dispatcher = Arc::new(RealtimeEventDispatcher::new(
            self.sequencer.clone(),
            playback,
            self.bridge.clone(),
        ));
        self.realtime_dispatcher = Some(dispatcher.clone());
        let sink = Arc::new(TabEventSink::new(
            dispatcher,
            self.bridge.clone(),
            self.realtime_status.clone(),
        ));

        let registry = self.state.registry.clone();
        let endpoint = self.endpoint.clone();
        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            match registry.start(endpoint.clone(), start_config, sink).await {
                Ok(session) => {
                    let current = registry
                        .get(&endpoint)
                        .is_some_and(|s| s.id() == session.id());
                    if current {
                        bridge.send(TutorOutgoingMessage::RealtimeStarted {
                            session_id: session.id(),
                        });
                    }
                }
                Err(e) => {
                    bridge.send(TutorOutgoingMessage::error(e.code(), e.to_string()));
                }
            }
        });
    }

    fn realtime_open(&self) -> bool {
        self.state
            .registry
            .get(&self.endpoint)
            .is_some_and(|session| session.is_open())
    }

    fn stop_realtime(&mut self) {
        self.realtime_status.set(SessionStatus::Idle);
        self.sequencer.reset();
        self.realtime_dispatcher = None;
        if self.state.registry.stop(&self.endpoint) {
            self.bridge.send(TutorOutgoingMessage::RealtimeStopped {
                reason: "Stopped by client".to_string(),
            });
        }
    }

    // =========================================================================
    // Turn-based mode
    // =========================================================================

    fn start_tutor(&mut self, start: StartSession) {
        self.stop_realtime();
        self.end_tutor();

        let page = start.page.normalized();
        if !page.is_readable() {
            self.bridge.send(TutorOutgoingMessage::error(
                "page_unreadable",
                PAGE_UNREADABLE_MESSAGE,
            ));
            return;
        }

        let key = start.api_key.as_deref();
        let collaborators = self.state.vision(key).and_then(|vision| {
            Ok((
                vision,
                self.state.speech(key)?,
                self.state.transcriber(key)?,
            ))
        });
        let (vision, speech, transcriber) = match collaborators {
            Ok(collaborators) => collaborators,
            Err(e) => {
                self.bridge
                    .send(TutorOutgoingMessage::error("invalid_configuration", e.to_string()));
                return;
            }
        };

        let settings = TutorSettings {
            system_prompt: start
                .system_prompt
                .unwrap_or_else(|| self.state.config.system_prompt.clone()),
            voice: start.voice.or_else(|| Some(self.state.config.voice.clone())),
        };
        let services = TutorServices {
            vision: Arc::new(vision),
            speech: Arc::new(speech),
            snapshots: self.bridge.clone(),
            output: self.bridge.clone(),
            local: self.bridge.clone(),
            ui: self.bridge.clone(),
        };
        let controller = Arc::new(TurnController::new(settings, services));

        let recorder = Arc::new(BufferedRecognizerSink::new());
        let capture = CapturePipeline::new(controller.status_cell());
        capture.set_sink(recorder.clone());

        self.tutor = Some(ActiveTutor {
            controller: controller.clone(),
            capture,
            recorder,
            transcriber: Arc::new(transcriber),
        });

        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.begin(page).await {
                bridge.send(TutorOutgoingMessage::error(
                    "page_unreadable",
                    e.to_string(),
                ));
            }
        });
    }

    /// Transcribe the audio recorded since `start_talking`, or release the
    /// realtime microphone.
    fn stop_talking(&mut self) {
        let Some(tutor) = &self.tutor else {
            self.realtime_status
                .transition(SessionStatus::Listening, SessionStatus::Idle);
            return;
        };
        let pcm = tutor.recorder.take();
        if pcm.is_empty() {
            tutor
                .controller
                .on_recognition_error(RecognitionError::NoSpeech);
            return;
        }

        let controller = tutor.controller.clone();
        let transcriber = tutor.transcriber.clone();
        tokio::spawn(async move {
            let transcript = match AudioUpload::wav_from_pcm16(&pcm, CAPTURE_SAMPLE_RATE) {
                Ok(upload) => transcriber.transcribe(upload).await,
                Err(e) => Err(e),
            };
            match transcript {
                Ok(text) => controller.on_transcript(&text).await,
                Err(e) => {
                    warn!("Transcription failed: {}", e);
                    controller.on_recognition_error(RecognitionError::Recognizer(e.to_string()));
                }
            }
        });
    }

    fn end_tutor(&mut self) {
        if let Some(tutor) = self.tutor.take() {
            tutor.capture.clear_sink();
            tutor.controller.end();
        }
    }

    /// Release everything the tab owned.
    fn shutdown(&mut self) {
        self.state.registry.stop(&self.endpoint);
        self.realtime_status.set(SessionStatus::Idle);
        self.realtime_capture.clear_sink();
        self.sequencer.reset();
        self.realtime_dispatcher = None;
        self.end_tutor();
        self.bridge.close();
    }
}
