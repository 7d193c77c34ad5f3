//! Error types for the pipeline.

pub mod voice_error;

pub use voice_error::{VoiceError, VoiceResult};
