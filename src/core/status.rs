//! Per-endpoint conversational status.
//!
//! Exactly one [`SessionStatus`] holds for an endpoint at any time. The owner of
//! the current mode writes it: the turn controller in turn-based mode, the tab
//! handler and the playback sink in realtime mode. Capture callbacks only read
//! it. Reads are a single atomic load so device callbacks can check it on every
//! frame.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Who may speak right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl SessionStatus {
    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Listening => 1,
            Self::Thinking => 2,
            Self::Speaking => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Listening,
            2 => Self::Thinking,
            3 => Self::Speaking,
            _ => Self::Idle,
        }
    }

    /// Capture may run in every status except `Speaking`.
    pub fn allows_capture(self) -> bool {
        self != Self::Speaking
    }

    /// Frames are forwarded to a sink only while listening.
    pub fn forwards_frames(self) -> bool {
        self == Self::Listening
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Thinking => write!(f, "thinking"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Shared, lock-free status cell for one endpoint.
#[derive(Debug, Clone, Default)]
pub struct StatusCell {
    inner: Arc<AtomicU8>,
}

impl StatusCell {
    pub fn new(status: SessionStatus) -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(status.as_u8())),
        }
    }

    #[inline]
    pub fn get(&self) -> SessionStatus {
        SessionStatus::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// Store a new status, returning the previous one.
    pub fn set(&self, status: SessionStatus) -> SessionStatus {
        SessionStatus::from_u8(self.inner.swap(status.as_u8(), Ordering::AcqRel))
    }

    /// Move from `from` to `to` only if the cell still holds `from`.
    pub fn transition(&self, from: SessionStatus, to: SessionStatus) -> bool {
        self.inner
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(StatusCell::default().get(), SessionStatus::Idle);
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let cell = StatusCell::new(SessionStatus::Speaking);
        assert!(!cell.transition(SessionStatus::Idle, SessionStatus::Listening));
        assert_eq!(cell.get(), SessionStatus::Speaking);
        assert!(cell.transition(SessionStatus::Speaking, SessionStatus::Idle));
        assert_eq!(cell.get(), SessionStatus::Idle);
    }

    #[test]
    fn test_clones_share_state() {
        let cell = StatusCell::default();
        let reader = cell.clone();
        cell.set(SessionStatus::Listening);
        assert_eq!(reader.get(), SessionStatus::Listening);
    }

    #[test]
    fn test_capture_rules() {
        assert!(SessionStatus::Idle.allows_capture());
        assert!(!SessionStatus::Speaking.allows_capture());
        assert!(SessionStatus::Listening.forwards_frames());
        assert!(!SessionStatus::Thinking.forwards_frames());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Thinking).unwrap();
        assert_eq!(json, "\"thinking\"");
    }
}
