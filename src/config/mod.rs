//! Configuration for the speech-to-utterance pipeline.
//!
//! The host application constructs a [`VoiceConfig`] programmatically (or via
//! [`VoiceConfig::from_env`]) and hands it to the pipeline. Environment
//! variables always override programmatic values.
//!
//! # Modules
//! - `env`: environment variable overrides (`TABLESCRIBE_*`)
//! - `validation`: configuration validation logic

mod env;
mod validation;

use serde::{Deserialize, Serialize};

use crate::errors::VoiceResult;

/// Default number of samples per encoded PCM frame.
pub const DEFAULT_FRAME_SAMPLES: usize = 4096;

/// Default quiet window before the timer heuristic finalizes, in milliseconds.
pub const DEFAULT_QUIET_WINDOW_MS: u64 = 3000;

/// Number of identical consecutive partials that fires the pattern heuristic.
pub const DEFAULT_PARTIAL_REPEAT_WINDOW: usize = 3;

/// Pipeline configuration.
///
/// Covers the credential endpoint, the recognition service connection, audio
/// capture, and the finalization heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// HTTP endpoint that issues single-use session credentials.
    pub token_endpoint: String,

    /// WebSocket base URL of the recognition service. Ignored when the
    /// credential endpoint returns a pre-signed URL.
    pub asr_endpoint: String,

    /// Recognition model identifier, embedded in the stream URL.
    pub model_id: String,

    /// Optional language code (e.g. "en"). Omitted from the URL when unset.
    pub language: Option<String>,

    /// Audio sample rate in Hz. The wire format is fixed at PCM16 mono.
    pub sample_rate: u32,

    /// Samples per encoded audio frame.
    pub frame_samples: usize,

    /// Quiet window for the timer finalization heuristic, in milliseconds.
    pub quiet_window_ms: u64,

    /// Consecutive identical partials required to fire the pattern heuristic.
    pub partial_repeat_window: usize,

    /// How long to wait for the service's session-started event after the
    /// socket opens, in seconds.
    pub session_start_timeout_secs: u64,

    /// Preferred input device name. Falls back to the system default.
    pub input_device: Option<String>,

    /// Whether to send the remote end-of-speech tuning message once per
    /// session after session start.
    pub send_remote_vad_config: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            token_endpoint: String::new(),
            asr_endpoint: "wss://api.elevenlabs.io/v1/speech-to-text/realtime".to_string(),
            model_id: "scribe_v2_realtime".to_string(),
            language: None,
            sample_rate: 16000,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            quiet_window_ms: DEFAULT_QUIET_WINDOW_MS,
            partial_repeat_window: DEFAULT_PARTIAL_REPEAT_WINDOW,
            session_start_timeout_secs: 10,
            input_device: None,
            send_remote_vad_config: true,
        }
    }
}

impl VoiceConfig {
    /// Build a configuration from defaults plus `TABLESCRIBE_*` environment
    /// overrides, then validate it.
    pub fn from_env() -> VoiceResult<Self> {
        let mut config = Self::default();
        env::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration. Called by [`VoiceConfig::from_env`];
    /// hosts building the struct directly should call it themselves.
    pub fn validate(&self) -> VoiceResult<()> {
        validation::validate(self)
    }
}
