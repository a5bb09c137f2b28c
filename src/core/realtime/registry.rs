//! Endpoint-keyed registry of realtime sessions.
//!
//! Each endpoint owns at most one session. Starting a session for an endpoint
//! closes whatever it had before, and a start that was superseded or stopped
//! while connecting never registers its session.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::base::{
    CONNECT_TIMEOUT, EndpointId, EventSink, RealtimeError, RealtimeResult, RealtimeStartConfig,
};
use super::openai::transport::{RealtimeConnector, WebSocketConnector};
use super::session::{self, RealtimeSession};
use crate::core::audio::capture::FrameSink;

/// An in-flight start for one endpoint.
struct Claim {
    attempt: Uuid,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<EndpointId, Arc<RealtimeSession>>,
    claims: HashMap<EndpointId, Claim>,
}

/// Owns every realtime session in the process.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    connector: Arc<dyn RealtimeConnector>,
    connect_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Arc::new(WebSocketConnector::new()))
    }
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn RealtimeConnector>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            connector,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Open a session for `endpoint`, replacing any existing one.
    ///
    /// Resolves once the provider connection is open and the handshake has been
    /// queued. Provider events flow to `sink` until the session ends.
    pub async fn start(
        &self,
        endpoint: EndpointId,
        config: RealtimeStartConfig,
        sink: Arc<dyn EventSink>,
    ) -> RealtimeResult<Arc<RealtimeSession>> {
        config.validate()?;

        let attempt = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut inner = self.inner.lock();
            if let Some(previous) = inner.sessions.remove(&endpoint) {
                info!(endpoint = %endpoint, "Replacing existing realtime session");
                previous.close();
            }
            if let Some(previous) = inner.claims.insert(
                endpoint.clone(),
                Claim {
                    attempt,
                    cancel: cancel.clone(),
                },
            ) {
                debug!(endpoint = %endpoint, "Superseding in-flight realtime start");
                previous.cancel.cancel();
            }
        }

        let opened = tokio::select! {
            _ = cancel.cancelled() => Err(RealtimeError::Cancelled),
            result = tokio::time::timeout(
                self.connect_timeout,
                session::open(self.connector.as_ref(), endpoint.clone(), &config),
            ) => match result {
                Ok(opened) => opened,
                Err(_) => Err(RealtimeError::ConnectionTimeout(self.connect_timeout)),
            },
        };

        let mut inner = self.inner.lock();
        let owns_claim = inner
            .claims
            .get(&endpoint)
            .is_some_and(|claim| claim.attempt == attempt);
        if owns_claim {
            inner.claims.remove(&endpoint);
        }

        let (session, inbound) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(endpoint = %endpoint, "Realtime start failed: {}", e);
                return Err(e);
            }
        };

        if !owns_claim {
            drop(inner);
            debug!(endpoint = %endpoint, "Discarding superseded realtime session");
            session.close();
            return Err(RealtimeError::Cancelled);
        }

        inner.sessions.insert(endpoint.clone(), session.clone());
        drop(inner);

        let registry = Arc::downgrade(&self.inner);
        session::spawn_event_pump(session.clone(), inbound, sink, move |ended| {
            evict(&registry, ended);
        });

        Ok(session)
    }

    /// Close the endpoint's session and cancel any in-flight start.
    ///
    /// Returns `true` if there was anything to stop. Calling it again is a no-op.
    pub fn stop(&self, endpoint: &EndpointId) -> bool {
        let (session, claim) = {
            let mut inner = self.inner.lock();
            (inner.sessions.remove(endpoint), inner.claims.remove(endpoint))
        };
        if let Some(claim) = &claim {
            claim.cancel.cancel();
        }
        if let Some(session) = &session {
            session.close();
        }
        let stopped = session.is_some() || claim.is_some();
        if stopped {
            info!(endpoint = %endpoint, "Realtime session stopped");
        }
        stopped
    }

    /// Relay a JSON message to the endpoint's open session.
    pub fn send(&self, endpoint: &EndpointId, message: &Value) -> bool {
        self.get(endpoint)
            .is_some_and(|session| session.send_json(message))
    }

    /// Forward PCM16 audio to the endpoint's open session.
    pub fn send_audio(&self, endpoint: &EndpointId, pcm: &[u8]) -> bool {
        self.get(endpoint)
            .is_some_and(|session| session.send_audio(pcm))
    }

    pub fn get(&self, endpoint: &EndpointId) -> Option<Arc<RealtimeSession>> {
        self.inner.lock().sessions.get(endpoint).cloned()
    }

    /// Whether a start is in flight for `endpoint`.
    pub fn is_connecting(&self, endpoint: &EndpointId) -> bool {
        self.inner.lock().claims.contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session. Used on shutdown.
    pub fn stop_all(&self) {
        let (sessions, claims) = {
            let mut inner = self.inner.lock();
            (
                std::mem::take(&mut inner.sessions),
                std::mem::take(&mut inner.claims),
            )
        };
        for claim in claims.into_values() {
            claim.cancel.cancel();
        }
        for session in sessions.into_values() {
            session.close();
        }
    }
}

/// Remove `ended` from the registry unless a newer session replaced it.
fn evict(registry: &Weak<Mutex<RegistryInner>>, ended: &RealtimeSession) {
    let Some(inner) = registry.upgrade() else {
        return;
    };
    let mut inner = inner.lock();
    let same_instance = inner
        .sessions
        .get(ended.endpoint())
        .is_some_and(|current| current.id() == ended.id());
    if same_instance {
        inner.sessions.remove(ended.endpoint());
        debug!(endpoint = %ended.endpoint(), "Evicted ended realtime session");
    }
}

/// Capture sink that forwards frames to one endpoint's realtime session.
#[derive(Clone)]
pub struct RegistryRelay {
    registry: SessionRegistry,
    endpoint: EndpointId,
}

impl RegistryRelay {
    pub fn new(registry: SessionRegistry, endpoint: EndpointId) -> Self {
        Self { registry, endpoint }
    }
}

impl FrameSink for RegistryRelay {
    fn deliver(&self, pcm: Bytes) -> bool {
        self.registry.send_audio(&self.endpoint, &pcm)
    }
}
