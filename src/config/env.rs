//! Environment variable overrides for [`VoiceConfig`].

use std::env;

use super::VoiceConfig;
use crate::errors::{VoiceError, VoiceResult};

/// Apply `TABLESCRIBE_*` environment overrides to a configuration.
///
/// Unset variables leave the existing value untouched; set-but-empty string
/// variables clear optional fields.
pub(super) fn apply_env_overrides(config: &mut VoiceConfig) -> VoiceResult<()> {
    if let Ok(value) = env::var("TABLESCRIBE_TOKEN_ENDPOINT") {
        config.token_endpoint = value;
    }

    if let Ok(value) = env::var("TABLESCRIBE_ASR_ENDPOINT") {
        config.asr_endpoint = value;
    }

    if let Ok(value) = env::var("TABLESCRIBE_MODEL_ID") {
        config.model_id = value;
    }

    if let Ok(value) = env::var("TABLESCRIBE_LANGUAGE") {
        config.language = if value.is_empty() { None } else { Some(value) };
    }

    if let Ok(value) = env::var("TABLESCRIBE_INPUT_DEVICE") {
        config.input_device = if value.is_empty() { None } else { Some(value) };
    }

    if let Ok(value) = env::var("TABLESCRIBE_QUIET_WINDOW_MS") {
        config.quiet_window_ms = parse_var("TABLESCRIBE_QUIET_WINDOW_MS", &value)?;
    }

    if let Ok(value) = env::var("TABLESCRIBE_FRAME_SAMPLES") {
        config.frame_samples = parse_var("TABLESCRIBE_FRAME_SAMPLES", &value)?;
    }

    if let Ok(value) = env::var("TABLESCRIBE_PARTIAL_REPEAT_WINDOW") {
        config.partial_repeat_window = parse_var("TABLESCRIBE_PARTIAL_REPEAT_WINDOW", &value)?;
    }

    if let Ok(value) = env::var("TABLESCRIBE_SESSION_START_TIMEOUT_SECS") {
        config.session_start_timeout_secs =
            parse_var("TABLESCRIBE_SESSION_START_TIMEOUT_SECS", &value)?;
    }

    if let Ok(value) = env::var("TABLESCRIBE_SEND_REMOTE_VAD_CONFIG") {
        config.send_remote_vad_config = matches!(value.as_str(), "1" | "true" | "yes");
    }

    Ok(())
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> VoiceResult<T> {
    value
        .parse()
        .map_err(|_| VoiceError::Config(format!("invalid value for {name}: '{value}'")))
}
