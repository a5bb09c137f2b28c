//! OpenAI REST collaborators against a mocked backend.

use bytes::Bytes;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tutor_gateway::core::services::{
    AudioUpload, OpenAIEndpoint, OpenAISpeech, OpenAITranscriber, OpenAIVisionChat,
    ServiceError, SpeechRequest, SpeechSynthesizer, SynthesisOutcome, Transcriber, VisionChat,
};
use tutor_gateway::core::tutor::conversation::Turn;
use tutor_gateway::core::tutor::page::VisualSnapshot;

fn endpoint(server: &MockServer) -> OpenAIEndpoint {
    OpenAIEndpoint::new("sk-test").with_base_url(format!("{}/v1", server.uri()))
}

fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn test_vision_chat_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o", "max_tokens": 200})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("It's 3/4!")))
        .expect(1)
        .mount(&server)
        .await;

    let vision = OpenAIVisionChat::new(reqwest::Client::new(), endpoint(&server));
    let turns = [Turn::user(
        "What is 1/4 + 2/4?",
        Some(VisualSnapshot::new("data:image/png;base64,AAAA")),
    )];
    let reply = vision.chat("Be kind.", &turns).await.unwrap();
    assert_eq!(reply, "It's 3/4!");

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["messages"][0]["content"], "Be kind.");
    assert_eq!(
        body["messages"][1]["content"][1]["image_url"]["url"],
        "data:image/png;base64,AAAA"
    );
}

#[tokio::test]
async fn test_vision_chat_error_message_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached for gpt-4o", "type": "requests"}
        })))
        .mount(&server)
        .await;

    let vision = OpenAIVisionChat::new(reqwest::Client::new(), endpoint(&server));
    let err = vision
        .chat("rules", &[Turn::user("hi", None)])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ServiceError::Upstream {
            status: 429,
            message: "Rate limit reached for gpt-4o".into()
        }
    );
}

#[tokio::test]
async fn test_vision_chat_generic_error_without_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let vision = OpenAIVisionChat::new(reqwest::Client::new(), endpoint(&server));
    let err = vision
        .chat("rules", &[Turn::user("hi", None)])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "OpenAI API request failed");
}

#[tokio::test]
async fn test_vision_chat_empty_completion_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let vision = OpenAIVisionChat::new(reqwest::Client::new(), endpoint(&server));
    let err = vision
        .chat("rules", &[Turn::user("hi", None)])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_transcription() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"text": "What is a numerator?"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transcriber = OpenAITranscriber::new(reqwest::Client::new(), endpoint(&server));
    let pcm: Vec<u8> = (0..2400i16).flat_map(|s| s.to_le_bytes()).collect();
    let upload = AudioUpload::wav_from_pcm16(&pcm, 24_000).unwrap();
    let text = transcriber.transcribe(upload).await.unwrap();
    assert_eq!(text, "What is a numerator?");

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"model\""));
    assert!(body.contains("whisper-1"));
    assert!(body.contains("filename=\"audio.wav\""));
}

#[tokio::test]
async fn test_transcription_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "Audio file is too short"}
        })))
        .mount(&server)
        .await;

    let transcriber = OpenAITranscriber::new(reqwest::Client::new(), endpoint(&server));
    let err = transcriber
        .transcribe(AudioUpload::webm(vec![1u8, 2, 3]))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Audio file is too short");
}

#[tokio::test]
async fn test_speech_returns_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini-tts",
            "input": "Great job!",
            "voice": "nova",
            "response_format": "mp3"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFFu8, 0xFB, 0x90, 0x00]))
        .expect(1)
        .mount(&server)
        .await;

    let speech = OpenAISpeech::new(reqwest::Client::new(), endpoint(&server));
    let outcome = speech
        .synthesize(&SpeechRequest::new("Great job!", Some("nova")))
        .await;
    assert_eq!(
        outcome,
        SynthesisOutcome::Audio(Bytes::from_static(&[0xFF, 0xFB, 0x90, 0x00]))
    );
}

#[tokio::test]
async fn test_speech_failure_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let speech = OpenAISpeech::new(reqwest::Client::new(), endpoint(&server));
    let outcome = speech
        .synthesize(&SpeechRequest::new("Great job!", None))
        .await;
    assert!(matches!(outcome, SynthesisOutcome::Unavailable(reason) if reason.contains("503")));
}

#[tokio::test]
async fn test_speech_empty_body_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let speech = OpenAISpeech::new(reqwest::Client::new(), endpoint(&server));
    let outcome = speech.synthesize(&SpeechRequest::new("Hello", None)).await;
    assert_eq!(outcome, SynthesisOutcome::Unavailable("Empty audio".into()));
}
