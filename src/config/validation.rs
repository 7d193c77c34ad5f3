//! Validation logic for [`VoiceConfig`].

use super::VoiceConfig;
use crate::errors::{VoiceError, VoiceResult};

/// Validate a fully-assembled configuration.
pub(super) fn validate(config: &VoiceConfig) -> VoiceResult<()> {
    if config.token_endpoint.trim().is_empty() {
        return Err(VoiceError::Config(
            "token_endpoint must be set (TABLESCRIBE_TOKEN_ENDPOINT)".to_string(),
        ));
    }

    if !config.token_endpoint.starts_with("http://") && !config.token_endpoint.starts_with("https://")
    {
        return Err(VoiceError::Config(format!(
            "token_endpoint must be an http(s) URL, got '{}'",
            config.token_endpoint
        )));
    }

    if !config.asr_endpoint.starts_with("ws://") && !config.asr_endpoint.starts_with("wss://") {
        return Err(VoiceError::Config(format!(
            "asr_endpoint must be a ws(s) URL, got '{}'",
            config.asr_endpoint
        )));
    }

    if config.model_id.trim().is_empty() {
        return Err(VoiceError::Config("model_id must not be empty".to_string()));
    }

    if config.sample_rate == 0 {
        return Err(VoiceError::Config("sample_rate must be non-zero".to_string()));
    }

    if config.frame_samples == 0 {
        return Err(VoiceError::Config(
            "frame_samples must be non-zero".to_string(),
        ));
    }

    if config.quiet_window_ms == 0 {
        return Err(VoiceError::Config(
            "quiet_window_ms must be non-zero".to_string(),
        ));
    }

    if config.partial_repeat_window < 2 {
        return Err(VoiceError::Config(
            "partial_repeat_window must be at least 2".to_string(),
        ));
    }

    Ok(())
}
