//! Session lifecycle state, connection flags, and close classification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock as SyncRwLock;

use super::StatusCallback;
use crate::errors::VoiceError;

/// Closes arriving sooner than this after the socket opens are treated as
/// the service rejecting the connection outright.
const IMMEDIATE_CLOSE_WINDOW: Duration = Duration::from_millis(500);

/// Lifecycle state of the transcription session, surfaced read-only to the
/// host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    AcquiringCredential,
    Connecting,
    Connected,
    Error,
}

impl SessionStatus {
    /// Stable string form for UI observation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::AcquiringCredential => "getting-token",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection-scoped flags.
///
/// All three are set during a connection's lifetime and cleared on full
/// teardown; none survives across sessions.
#[derive(Debug, Default)]
pub struct SessionFlags {
    /// Set when the inbound session-started event is observed. Outbound audio
    /// is dropped until then.
    pub session_ready: AtomicBool,
    /// Set by `stop()` before the socket closes, so the close event is not
    /// classified as an error.
    pub intentional_stop: AtomicBool,
    /// Set after the one-shot remote VAD config message is sent.
    pub config_sent: AtomicBool,
}

impl SessionFlags {
    /// Reset all flags for a new connection attempt.
    pub fn reset(&self) {
        self.session_ready.store(false, Ordering::Release);
        self.intentional_stop.store(false, Ordering::Release);
        self.config_sent.store(false, Ordering::Release);
    }
}

/// Classify an unintentional socket close into a specific connection error.
///
/// Code 1008 always reads as a credential problem. Otherwise closes inside
/// the immediate window read as the service rejecting the token, 1005 as a
/// mid-session drop, and an unrequested clean 1000 is still an error: a
/// silent server-side disconnect is never a benign idle transition.
pub fn classify_close(code: Option<u16>, connected_for: Duration) -> VoiceError {
    match code {
        Some(1008) => VoiceError::Connection(
            "session credential expired or was rejected by the service (policy close)".to_string(),
        ),
        _ if connected_for < IMMEDIATE_CLOSE_WINDOW => VoiceError::Connection(format!(
            "connection rejected {}ms after opening; the session token was likely invalid or already used",
            connected_for.as_millis()
        )),
        Some(1005) | None => VoiceError::Connection(
            "connection dropped unexpectedly mid-session (no close status received)".to_string(),
        ),
        Some(1000) => VoiceError::Connection(
            "service closed the session cleanly without a stop request".to_string(),
        ),
        Some(other) => VoiceError::Connection(format!(
            "connection closed unexpectedly (close code {other})"
        )),
    }
}

/// Shared status cell: the lifecycle state, the current error message, and
/// the host's status callback.
///
/// Cloned (via `Arc`) into the connection task so transitions observed there
/// reach the host the same way as transitions made by `start()`/`stop()`.
#[derive(Default)]
pub(crate) struct StatusCell {
    status: SyncRwLock<Option<SessionStatus>>,
    last_error: SyncRwLock<Option<String>>,
    callback: SyncRwLock<Option<StatusCallback>>,
}

impl StatusCell {
    pub(crate) fn get(&self) -> SessionStatus {
        self.status.read().unwrap_or(SessionStatus::Idle)
    }

    pub(crate) fn error_message(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub(crate) fn clear_error(&self) {
        self.last_error.write().take();
    }

    pub(crate) fn set_callback(&self, callback: Option<StatusCallback>) {
        *self.callback.write() = callback;
    }

    /// Transition to `status` and notify the host callback.
    pub(crate) async fn set(&self, status: SessionStatus) {
        {
            *self.status.write() = Some(status);
        }

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(status).await;
        }
    }

    /// Record `err` as the current error message and transition to `Error`.
    pub(crate) async fn set_error(&self, err: &VoiceError) {
        {
            *self.last_error.write() = Some(err.to_string());
        }
        self.set(SessionStatus::Error).await;
    }
}
