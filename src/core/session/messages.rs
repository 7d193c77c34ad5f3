//! Wire message types for the realtime transcription protocol.
//!
//! Outgoing messages are JSON envelopes written to the WebSocket; incoming
//! messages are keyed by a `message_type` (or legacy `type`) discriminator
//! and parsed into [`ServerMessage`]. Unrecognized types surface as
//! [`ServerMessage::Unknown`] so the session can log and drop them without
//! failing.

use serde::{Deserialize, Serialize};

// =============================================================================
// Outgoing messages (client to server)
// =============================================================================

/// Audio chunk envelope: base64 PCM16 plus the sample rate.
#[derive(Debug, Serialize)]
pub struct InputAudioChunk {
    /// Message type identifier (always "input_audio_chunk")
    pub message_type: &'static str,
    /// Base64-encoded little-endian PCM16 audio
    pub audio_base_64: String,
    /// Sample rate of the audio in Hz
    pub sample_rate: u32,
}

impl InputAudioChunk {
    #[inline]
    pub fn new(audio_base_64: String, sample_rate: u32) -> Self {
        Self {
            message_type: "input_audio_chunk",
            audio_base_64,
            sample_rate,
        }
    }
}

/// End-of-speech tuning for the service's own commit detection.
///
/// Sent at most once per session, after the session-started event.
#[derive(Debug, Serialize)]
pub struct SetConfig {
    /// Message type identifier (always "set_config")
    pub message_type: &'static str,
    pub config: RemoteVadConfig,
}

/// The service-side VAD parameters this client tunes.
#[derive(Debug, Serialize)]
pub struct RemoteVadConfig {
    pub vad_silence_threshold_secs: f32,
    pub commit_strategy: &'static str,
}

impl Default for SetConfig {
    fn default() -> Self {
        Self {
            message_type: "set_config",
            config: RemoteVadConfig {
                vad_silence_threshold_secs: 0.5,
                commit_strategy: "vad",
            },
        }
    }
}

/// Signals that no more audio will be sent. Lets the service flush any tail
/// transcript before the socket closes.
#[derive(Debug, Serialize)]
pub struct EndOfStream {
    /// Message type identifier (always "eos")
    pub message_type: &'static str,
}

impl Default for EndOfStream {
    fn default() -> Self {
        Self { message_type: "eos" }
    }
}

// =============================================================================
// Incoming messages (server to client)
// =============================================================================

/// Word timing attached to timestamped transcript variants.
#[derive(Debug, Clone, Deserialize)]
pub struct WordTiming {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Deserialize)]
struct SessionStartedBody {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptBody {
    text: String,
    #[serde(default)]
    words: Vec<WordTiming>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: String,
}

/// Parsed inbound protocol message.
#[derive(Debug)]
pub enum ServerMessage {
    /// Session established; outbound audio may flow from here on.
    SessionStarted { session_id: String },
    /// Provisional recognition result; may be revised.
    Partial { text: String, words: Vec<WordTiming> },
    /// Finalized recognition result for a completed speech segment.
    Committed { text: String, words: Vec<WordTiming> },
    /// Acknowledgement of a `set_config` message.
    ConfigAck,
    /// Error reported by the service.
    Error { code: String, message: String },
    /// Unrecognized message type, kept raw for logging.
    Unknown(String),
}

impl ServerMessage {
    /// Parse a WebSocket text payload.
    ///
    /// The discriminator is `message_type`, falling back to the legacy
    /// `type` key. Error-shaped messages are `type:"error"` or any
    /// discriminator ending in `"Error"`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Discriminator {
            message_type: Option<String>,
            #[serde(rename = "type")]
            kind: Option<String>,
        }

        let peek: Discriminator = serde_json::from_str(text)?;
        let discriminator = peek.message_type.or(peek.kind).unwrap_or_default();

        match discriminator.as_str() {
            "session_started" => {
                let body: SessionStartedBody = serde_json::from_str(text)?;
                Ok(ServerMessage::SessionStarted {
                    session_id: body.session_id,
                })
            }
            "partial_transcript" | "partial_transcript_with_timestamps" => {
                let body: TranscriptBody = serde_json::from_str(text)?;
                Ok(ServerMessage::Partial {
                    text: body.text,
                    words: body.words,
                })
            }
            "committed_transcript" | "committed_transcript_with_timestamps" => {
                let body: TranscriptBody = serde_json::from_str(text)?;
                Ok(ServerMessage::Committed {
                    text: body.text,
                    words: body.words,
                })
            }
            "config_updated" | "config_set" => Ok(ServerMessage::ConfigAck),
            kind if kind == "error" || kind.ends_with("Error") => {
                let body: ErrorBody = serde_json::from_str(text)?;
                Ok(ServerMessage::Error {
                    code: discriminator,
                    message: body.error,
                })
            }
            _ => Ok(ServerMessage::Unknown(text.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_started() {
        let msg = ServerMessage::parse(
            r#"{"message_type":"session_started","session_id":"sess_42"}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::SessionStarted { session_id } => assert_eq!(session_id, "sess_42"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_partial_and_committed() {
        let partial = ServerMessage::parse(
            r#"{"message_type":"partial_transcript","text":"roll for"}"#,
        )
        .unwrap();
        assert!(matches!(partial, ServerMessage::Partial { ref text, .. } if text == "roll for"));

        let committed = ServerMessage::parse(
            r#"{"message_type":"committed_transcript","text":"roll for initiative"}"#,
        )
        .unwrap();
        assert!(
            matches!(committed, ServerMessage::Committed { ref text, .. } if text == "roll for initiative")
        );
    }

    #[test]
    fn parses_timestamped_variants() {
        let msg = ServerMessage::parse(
            r#"{"message_type":"committed_transcript_with_timestamps","text":"hello","words":[{"text":"hello","start":0.1,"end":0.4}]}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::Committed { text, words } => {
                assert_eq!(text, "hello");
                assert_eq!(words.len(), 1);
                assert_eq!(words[0].start, 0.1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_config_ack_aliases() {
        assert!(matches!(
            ServerMessage::parse(r#"{"message_type":"config_updated"}"#).unwrap(),
            ServerMessage::ConfigAck
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"message_type":"config_set"}"#).unwrap(),
            ServerMessage::ConfigAck
        ));
    }

    #[test]
    fn parses_error_shapes() {
        let plain = ServerMessage::parse(r#"{"type":"error","message":"bad audio"}"#).unwrap();
        match plain {
            ServerMessage::Error { code, message } => {
                assert_eq!(code, "error");
                assert_eq!(message, "bad audio");
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let suffixed =
            ServerMessage::parse(r#"{"message_type":"quotaExceededError","error":"quota"}"#)
                .unwrap();
        assert!(matches!(suffixed, ServerMessage::Error { ref code, .. } if code == "quotaExceededError"));
    }

    #[test]
    fn unknown_types_are_kept_raw() {
        let msg = ServerMessage::parse(r#"{"message_type":"telemetry","data":1}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Unknown(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(ServerMessage::parse("{not json").is_err());
    }

    #[test]
    fn audio_chunk_envelope_shape() {
        let chunk = InputAudioChunk::new("QUJD".to_string(), 16000);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["message_type"], "input_audio_chunk");
        assert_eq!(json["audio_base_64"], "QUJD");
        assert_eq!(json["sample_rate"], 16000);
    }

    #[test]
    fn set_config_envelope_shape() {
        let json = serde_json::to_value(SetConfig::default()).unwrap();
        assert_eq!(json["message_type"], "set_config");
        assert_eq!(json["config"]["commit_strategy"], "vad");
        assert_eq!(json["config"]["vad_silence_threshold_secs"], 0.5);
    }

    #[test]
    fn eos_envelope_shape() {
        let json = serde_json::to_value(EndOfStream::default()).unwrap();
        assert_eq!(json["message_type"], "eos");
    }
}
