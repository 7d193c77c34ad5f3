//! Callback types for the voice pipeline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::VoiceError;

pub use crate::core::dispatcher::{DialogueDispatcher, DispatchErrorCallback};
pub use crate::core::session::StatusCallback;

/// Async callback for pipeline errors: credential, connection, and dispatch
/// failures all arrive here with their most specific classification.
pub type PipelineErrorCallback =
    Arc<dyn Fn(VoiceError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
