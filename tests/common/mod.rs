//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use tutor_gateway::config::{ServerConfig, TutorMode};
use tutor_gateway::core::audio::codec::to_base64;
use tutor_gateway::core::tutor::page::PageContent;
use tutor_gateway::state::AppState;

/// How long a test waits for any single asynchronous step.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Transcript delta the mock provider sends once the handshake is in.
pub const GREETING_DELTA: &str = "Hi! I see you're working on fractions.";

/// Samples in the audio delta that follows the transcript.
pub const GREETING_AUDIO_SAMPLES: usize = 480;

/// Page with enough text to pass the readability check.
pub fn readable_page() -> PageContent {
    PageContent {
        title: "Adding Fractions".into(),
        url: "https://school.example/fractions".into(),
        headings: vec!["Like denominators".into()],
        text_content: "To add fractions with the same denominator, add the numerators \
                       and keep the denominator. For example 1/4 + 2/4 = 3/4."
            .into(),
        screenshot: None,
        has_screenshot: false,
    }
}

/// Server configuration pointing every provider call at local mocks.
pub fn test_config(api_key: Option<&str>, base_url: &str, realtime_url: &str) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 3001,
        tls: None,
        openai_api_key: api_key.map(str::to_string),
        openai_base_url: base_url.to_string(),
        realtime_url: realtime_url.to_string(),
        system_prompt: "You are a patient math tutor.".into(),
        voice: "nova".into(),
        mode: TutorMode::TurnBased,
        realtime_model: "gpt-4o-realtime-preview-2024-10-01".into(),
        vision_model: "gpt-4o".into(),
        tts_model: "gpt-4o-mini-tts".into(),
        cors_allowed_origins: None,
    }
}

pub fn test_state(api_key: Option<&str>, base_url: &str, realtime_url: &str) -> Arc<AppState> {
    AppState::with_registry(
        test_config(api_key, base_url, realtime_url),
        Default::default(),
    )
}

// =============================================================================
// Mock realtime provider
// =============================================================================

/// What the mock provider observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Connected {
        conn: usize,
        protocols: String,
        beta: String,
        uri: String,
    },
    Received {
        conn: usize,
        event: Value,
    },
    Closed {
        conn: usize,
    },
}

/// What the mock provider does once the three handshake events arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProviderScript {
    /// Stream a transcript delta, an audio chunk and `response.done`, then
    /// keep the connection open
    Greet,
    /// Close the connection with a reason
    Hangup,
}

pub struct MockProvider {
    pub url: String,
    pub events: mpsc::UnboundedReceiver<ProviderEvent>,
}

impl MockProvider {
    pub async fn next_event(&mut self) -> ProviderEvent {
        tokio::time::timeout(STEP_TIMEOUT, self.events.recv())
            .await
            .expect("provider event timed out")
            .expect("provider stopped")
    }

    /// The next `count` events the provider receives on `conn`.
    pub async fn received_events(&mut self, conn: usize, count: usize) -> Vec<Value> {
        let mut events = Vec::new();
        while events.len() < count {
            if let ProviderEvent::Received { conn: c, event } = self.next_event().await
                && c == conn
            {
                events.push(event);
            }
        }
        events
    }

    /// Skip events until `conn` closes.
    pub async fn wait_closed(&mut self, conn: usize) {
        loop {
            if let ProviderEvent::Closed { conn: c } = self.next_event().await
                && c == conn
            {
                return;
            }
        }
    }
}

/// Start a local WebSocket server that speaks enough of the realtime protocol.
pub async fn spawn_mock_provider(script: ProviderScript) -> MockProvider {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/v1/realtime", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut next_conn = 0;
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream, next_conn, tx.clone(), script));
            next_conn += 1;
        }
    });

    MockProvider { url, events: rx }
}

async fn serve_connection(
    stream: TcpStream,
    conn: usize,
    tx: mpsc::UnboundedSender<ProviderEvent>,
    script: ProviderScript,
) {
    let mut protocols = String::new();
    let mut beta = String::new();
    let mut uri = String::new();
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        protocols = header("Sec-WebSocket-Protocol");
        beta = header("OpenAI-Beta");
        uri = request.uri().to_string();
        response
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("realtime"));
        Ok(response)
    };

    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let _ = tx.send(ProviderEvent::Connected {
        conn,
        protocols,
        beta,
        uri,
    });

    let (mut write, mut read) = ws.split();
    let mut received = 0;
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let event: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                let _ = tx.send(ProviderEvent::Received { conn, event });
                received += 1;
                if received != 3 {
                    continue;
                }
                match script {
                    ProviderScript::Greet => {
                        let delta = json!({
                            "type": "response.audio_transcript.delta",
                            "response_id": "resp_1",
                            "item_id": "item_1",
                            "output_index": 0,
                            "content_index": 0,
                            "delta": GREETING_DELTA,
                        });
                        let pcm: Vec<u8> = (0..GREETING_AUDIO_SAMPLES as i16)
                            .flat_map(|s| (s * 10).to_le_bytes())
                            .collect();
                        let audio = json!({
                            "type": "response.audio.delta",
                            "response_id": "resp_1",
                            "delta": to_base64(&pcm),
                        });
                        let done = json!({"type": "response.done", "response": {"id": "resp_1"}});
                        for event in [delta, audio, done] {
                            let _ = write.send(Message::Text(event.to_string().into())).await;
                        }
                    }
                    ProviderScript::Hangup => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: String::from("session expired").into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    let _ = tx.send(ProviderEvent::Closed { conn });
}

/// A TCP port with nothing listening on it.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
