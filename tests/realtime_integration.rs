//! Realtime sessions against a local WebSocket provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{
    GREETING_DELTA, MockProvider, ProviderEvent, ProviderScript, STEP_TIMEOUT, readable_page,
    spawn_mock_provider, unused_port,
};
use tutor_gateway::core::audio::codec::to_base64;
use tutor_gateway::core::realtime::{
    EndpointId, RealtimeError, RealtimeStartConfig, SessionNotice, SessionRegistry, SessionState,
};
use tutor_gateway::core::tutor::page::PageContent;

fn start_config(provider: &MockProvider) -> RealtimeStartConfig {
    RealtimeStartConfig::new("sk-test", readable_page())
        .with_url(provider.url.as_str())
        .with_system_prompt("You are a patient math tutor.")
        .with_voice(Some("nova".into()))
}

fn notice_channel() -> (
    Arc<mpsc::UnboundedSender<SessionNotice>>,
    mpsc::UnboundedReceiver<SessionNotice>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}

async fn next_notice(notices: &mut mpsc::UnboundedReceiver<SessionNotice>) -> SessionNotice {
    timeout(STEP_TIMEOUT, notices.recv())
        .await
        .expect("notice timed out")
        .expect("sink dropped")
}

#[tokio::test]
async fn test_handshake_and_event_forwarding() {
    let mut provider = spawn_mock_provider(ProviderScript::Greet).await;
    let registry = SessionRegistry::default();
    let endpoint = EndpointId::from("tab-1");
    let (sink, mut notices) = notice_channel();

    let session = registry
        .start(endpoint.clone(), start_config(&provider), sink)
        .await
        .expect("session should open");
    assert!(session.is_open());
    assert_eq!(session.voice(), "shimmer");
    assert_eq!(registry.len(), 1);

    match provider.next_event().await {
        ProviderEvent::Connected {
            protocols,
            beta,
            uri,
            ..
        } => {
            assert!(protocols.starts_with("realtime"));
            assert!(protocols.contains("openai-insecure-api-key.sk-test"));
            assert_eq!(beta, "realtime=v1");
            assert!(uri.ends_with("?model=gpt-4o-realtime-preview-2024-10-01"));
        }
        other => panic!("Expected Connected, got {other:?}"),
    }

    let handshake = provider.received_events(0, 3).await;
    let types: Vec<&str> = handshake
        .iter()
        .map(|e| e["type"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(
        types,
        ["session.update", "conversation.item.create", "response.create"]
    );
    assert_eq!(handshake[0]["session"]["voice"], "shimmer");
    assert_eq!(handshake[0]["session"]["input_audio_format"], "pcm16");
    let instructions = handshake[0]["session"]["instructions"].as_str().unwrap();
    assert!(instructions.starts_with("You are a patient math tutor."));
    assert!(instructions.contains("===== WEBPAGE TEXT CONTENT ====="));
    assert!(instructions.contains("1/4 + 2/4 = 3/4"));

    match next_notice(&mut notices).await {
        SessionNotice::Event(event) => {
            assert_eq!(event["type"], "response.audio_transcript.delta");
            assert_eq!(event["delta"], GREETING_DELTA);
        }
        other => panic!("Expected Event, got {other:?}"),
    }

    // Student audio reaches the provider's input buffer.
    let pcm: Vec<u8> = [1000i16, -1000, 0]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    assert!(registry.send_audio(&endpoint, &pcm));
    assert!(registry.send(&endpoint, &json!({"type": "input_audio_buffer.commit"})));
    let relayed = provider.received_events(0, 2).await;
    assert_eq!(relayed[0]["type"], "input_audio_buffer.append");
    assert_eq!(relayed[0]["audio"], to_base64(&pcm));
    assert_eq!(relayed[1]["type"], "input_audio_buffer.commit");
}

#[tokio::test]
async fn test_stop_closes_silently() {
    let mut provider = spawn_mock_provider(ProviderScript::Greet).await;
    let registry = SessionRegistry::default();
    let endpoint = EndpointId::from("tab-1");
    let (sink, mut notices) = notice_channel();

    let session = registry
        .start(endpoint.clone(), start_config(&provider), sink)
        .await
        .unwrap();

    assert!(registry.stop(&endpoint));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(registry.is_empty());
    assert!(!registry.stop(&endpoint));
    assert!(!registry.send_audio(&endpoint, &[0, 0]));

    provider.wait_closed(0).await;

    // The sink never hears about a close it asked for.
    loop {
        match timeout(Duration::from_millis(300), notices.recv()).await {
            Ok(Some(SessionNotice::Closed(reason))) => panic!("Unexpected close: {reason}"),
            Ok(Some(SessionNotice::Event(_))) => continue,
            Ok(None) | Err(_) => break,
        }
    }
}

#[tokio::test]
async fn test_restart_replaces_session() {
    let mut provider = spawn_mock_provider(ProviderScript::Greet).await;
    let registry = SessionRegistry::default();
    let endpoint = EndpointId::from("tab-1");

    let (first_sink, _first_notices) = notice_channel();
    let first = registry
        .start(endpoint.clone(), start_config(&provider), first_sink)
        .await
        .unwrap();

    let (second_sink, _second_notices) = notice_channel();
    let second = registry
        .start(endpoint.clone(), start_config(&provider), second_sink)
        .await
        .unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(first.state(), SessionState::Closed);
    assert!(second.is_open());
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get(&endpoint).unwrap().id(), second.id());

    provider.wait_closed(0).await;
}

#[tokio::test]
async fn test_remote_close_evicts_and_notifies() {
    let provider = spawn_mock_provider(ProviderScript::Hangup).await;
    let registry = SessionRegistry::default();
    let endpoint = EndpointId::from("tab-1");
    let (sink, mut notices) = notice_channel();

    let session = registry
        .start(endpoint.clone(), start_config(&provider), sink)
        .await
        .unwrap();

    assert_eq!(
        next_notice(&mut notices).await,
        SessionNotice::Closed("session expired".into())
    );
    assert_eq!(session.state(), SessionState::Closed);
    assert!(registry.get(&endpoint).is_none());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_endpoints_are_isolated() {
    let provider = spawn_mock_provider(ProviderScript::Greet).await;
    let registry = SessionRegistry::default();
    let tab_a = EndpointId::from("tab-a");
    let tab_b = EndpointId::from("tab-b");

    let (sink_a, _notices_a) = notice_channel();
    let (sink_b, _notices_b) = notice_channel();
    registry
        .start(tab_a.clone(), start_config(&provider), sink_a)
        .await
        .unwrap();
    let session_b = registry
        .start(tab_b.clone(), start_config(&provider), sink_b)
        .await
        .unwrap();
    assert_eq!(registry.len(), 2);

    assert!(registry.stop(&tab_a));
    assert_eq!(registry.len(), 1);
    assert!(session_b.is_open());
    assert!(registry.get(&tab_b).is_some());

    registry.stop_all();
    assert!(registry.is_empty());
    assert!(!session_b.is_open());
}

#[tokio::test]
async fn test_connect_failure_leaves_registry_empty() {
    let port = unused_port().await;
    let registry = SessionRegistry::default();
    let endpoint = EndpointId::from("tab-1");
    let (sink, _notices) = notice_channel();

    let config = RealtimeStartConfig::new("sk-test", readable_page())
        .with_url(format!("ws://127.0.0.1:{port}/v1/realtime"));
    let err = registry
        .start(endpoint.clone(), config, sink)
        .await
        .unwrap_err();

    assert!(matches!(err, RealtimeError::ConnectionFailed(_)));
    assert_eq!(err.code(), "connection_failed");
    assert!(registry.is_empty());
    assert!(!registry.is_connecting(&endpoint));
}

#[tokio::test]
async fn test_unreadable_page_never_connects() {
    let mut provider = spawn_mock_provider(ProviderScript::Greet).await;
    let registry = SessionRegistry::default();
    let (sink, _notices) = notice_channel();

    let config = RealtimeStartConfig::new("sk-test", PageContent::default())
        .with_url(provider.url.as_str());
    let err = registry
        .start(EndpointId::from("tab-1"), config, sink)
        .await
        .unwrap_err();

    assert_eq!(err, RealtimeError::PageContentUnavailable);
    assert!(
        timeout(Duration::from_millis(200), provider.events.recv())
            .await
            .is_err()
    );
}
