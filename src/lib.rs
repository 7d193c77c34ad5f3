//! Real-time speech-to-utterance pipeline for tabletop session capture.
//!
//! Captures microphone audio, streams it to a realtime speech-recognition
//! service over a persistent WebSocket session, and decides the exact moment
//! the speaker has finished an utterance, so the host application can forward
//! the finalized text downstream exactly once.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tablescribe::{VoiceConfig, VoicePipeline};
//!
//! # async fn run() -> tablescribe::VoiceResult<()> {
//! let config = VoiceConfig {
//!     token_endpoint: "https://campaigns.example/api/asr-token".to_string(),
//!     ..VoiceConfig::default()
//! };
//!
//! let mut pipeline = VoicePipeline::new(config)?;
//! pipeline.set_dialogue_dispatcher(Some(Arc::new(|utterance| {
//!     Box::pin(async move {
//!         println!("finalized: {utterance}");
//!         Ok(())
//!     })
//! })));
//!
//! pipeline.start().await?;
//! // ... speak ...
//! pipeline.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use config::VoiceConfig;
pub use core::pipeline::{DialogueDispatcher, PipelineErrorCallback, StatusCallback, VoicePipeline};
pub use core::session::{SessionStatus, TranscriptEvent, TranscriptionSession};
pub use errors::{VoiceError, VoiceResult};
