//! Transcription session client.
//!
//! Owns one network session per active capture period: fetches a single-use
//! credential, opens the streaming WebSocket, pushes encoded audio frames,
//! and parses inbound protocol messages into [`TranscriptEvent`]s consumed by
//! the finalization layer.

mod client;
mod credential;
mod messages;
mod state;

pub use client::{FrameSink, SessionStream, TranscriptionSession};
pub use credential::{SessionCredential, fetch_credential};
pub use messages::{EndOfStream, InputAudioChunk, ServerMessage, SetConfig, WordTiming};
pub use state::{SessionFlags, SessionStatus, classify_close};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Event produced by the session client from inbound protocol messages.
///
/// Consumed and then discarded by the finalization layer; never retained
/// beyond the current processing step.
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    /// The service established the session; audio flows from here on.
    SessionStarted { session_id: String },
    /// Provisional recognition result for in-flight speech.
    Partial { text: String, words: Vec<WordTiming> },
    /// Finalized recognition result for a completed speech segment.
    Committed { text: String, words: Vec<WordTiming> },
    /// The service acknowledged the remote VAD config.
    ConfigAck,
    /// Error reported by the service inside the protocol stream.
    Error { code: String, message: String },
}

/// Async callback invoked on every session status transition.
pub type StatusCallback =
    Arc<dyn Fn(SessionStatus) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
