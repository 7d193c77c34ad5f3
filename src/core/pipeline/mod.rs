//! Pipeline composition.
//!
//! [`VoicePipeline`] wires the four layers together: microphone capture
//! feeds the frame encoder, encoded frames stream through the transcription
//! session, transcript events drive the finalization heuristics, and the
//! accumulator dispatches finalized utterances to the host's dialogue
//! collaborator.
//!
//! Data flows strictly upward; control (start/stop) flows downward.
//! Teardown order on stop is fixed: quiet timer, then socket, then the
//! audio graph and microphone stream.

mod callbacks;

pub use callbacks::{DialogueDispatcher, PipelineErrorCallback, StatusCallback};

use std::sync::Arc;

use parking_lot::{Mutex, RwLock as SyncRwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::VoiceConfig;
use crate::core::audio::{SampleBlockSink, SampleSource, start_capture};
use crate::core::detector::{FinalizeTrigger, RepeatedPartialWindow};
use crate::core::dispatcher::UtteranceDispatcher;
use crate::core::encoder::PcmFrameEncoder;
use crate::core::session::{
    SessionStatus, SessionStream, TranscriptEvent, TranscriptionSession,
};
use crate::errors::{VoiceError, VoiceResult};

type SharedSource = Arc<Mutex<Option<Box<dyn SampleSource>>>>;

/// The real-time speech-to-utterance pipeline.
///
/// One instance owns at most one capture period at a time; `start()` while
/// active is rejected, and `stop()` must be called before starting again.
pub struct VoicePipeline {
    config: VoiceConfig,
    session: TranscriptionSession,
    dispatcher: Arc<UtteranceDispatcher>,
    error_callback: Arc<SyncRwLock<Option<PipelineErrorCallback>>>,
    source: SharedSource,
    event_task: Option<JoinHandle<()>>,
}

impl VoicePipeline {
    /// Create a pipeline from a validated configuration.
    pub fn new(config: VoiceConfig) -> VoiceResult<Self> {
        config.validate()?;

        let dispatcher = Arc::new(UtteranceDispatcher::new(std::time::Duration::from_millis(
            config.quiet_window_ms,
        )));

        Ok(Self {
            session: TranscriptionSession::new(config.clone()),
            dispatcher,
            error_callback: Arc::new(SyncRwLock::new(None)),
            source: Arc::new(Mutex::new(None)),
            event_task: None,
            config,
        })
    }

    /// Register the dialogue collaborator that receives each finalized
    /// utterance exactly once.
    pub fn set_dialogue_dispatcher(&self, dispatcher: Option<DialogueDispatcher>) {
        self.dispatcher.set_dialogue_dispatcher(dispatcher);
    }

    /// Register a callback for session status transitions.
    pub fn set_status_callback(&self, callback: Option<StatusCallback>) {
        self.session.set_status_callback(callback);
    }

    /// Register a callback for pipeline errors. Dispatch failures are routed
    /// here as well.
    pub fn set_error_callback(&self, callback: Option<PipelineErrorCallback>) {
        match &callback {
            Some(callback) => {
                let forward = callback.clone();
                self.dispatcher
                    .set_error_callback(Some(Arc::new(move |err| forward(err))));
            }
            None => self.dispatcher.set_error_callback(None),
        }
        *self.error_callback.write() = callback;
    }

    /// Current session lifecycle status.
    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// The most specific message for the current error, if any.
    pub fn error_message(&self) -> Option<String> {
        self.session.error_message()
    }

    /// Session id assigned by the service, once connected.
    pub fn session_id(&self) -> Option<String> {
        self.session.session_id()
    }

    /// Text accumulated toward the next utterance.
    pub fn pending_utterance(&self) -> String {
        self.dispatcher.pending_utterance()
    }

    /// Start a capture period: open the session, wire the event loop, and
    /// start the microphone.
    pub async fn start(&mut self) -> VoiceResult<()> {
        let stream = self.session.start().await?;

        let event_task = tokio::spawn(run_event_loop(
            stream,
            self.dispatcher.clone(),
            self.config.partial_repeat_window,
            self.error_callback.clone(),
            self.source.clone(),
        ));
        self.event_task = Some(event_task);

        let Some(sink) = self.session.frame_sink() else {
            self.stop().await;
            return Err(VoiceError::Connection(
                "session started without an audio channel".to_string(),
            ));
        };

        let encoder = Mutex::new(PcmFrameEncoder::new(self.config.frame_samples));
        let block_sink: SampleBlockSink = Arc::new(move |samples| {
            for frame in encoder.lock().push(&samples) {
                sink.deliver(frame);
            }
        });

        match start_capture(
            self.config.input_device.as_deref(),
            self.config.sample_rate,
            block_sink,
        ) {
            Ok(source) => {
                *self.source.lock() = Some(source);
                info!("Voice pipeline started");
                Ok(())
            }
            Err(err) => {
                warn!("Microphone capture failed to start; tearing session down");
                self.stop().await;
                Err(err)
            }
        }
    }

    /// End the capture period.
    ///
    /// Teardown order: quiet timer, then socket, then audio graph and
    /// microphone. A stop mid-dispatch lets the in-flight call finish but
    /// prevents any further triggers. Idempotent.
    pub async fn stop(&mut self) {
        self.dispatcher.reset();
        self.session.stop().await;
        release_source(&self.source).await;

        if let Some(task) = self.event_task.take() {
            // The event loop ends on its own once the session channels
            // close; reap it, then make sure.
            task.abort();
            let _ = task.await;
        }

        info!("Voice pipeline stopped");
    }
}

/// Stop the capture backend without blocking the runtime on the thread join.
async fn release_source(source: &SharedSource) {
    let taken = source.lock().take();
    if let Some(mut taken) = taken {
        let joined = tokio::task::spawn_blocking(move || taken.stop()).await;
        if joined.is_err() {
            warn!("Capture backend worker panicked during shutdown");
        }
    }
}

/// Consume one session's transcript events and drive the finalization
/// heuristics.
async fn run_event_loop(
    mut stream: SessionStream,
    dispatcher: Arc<UtteranceDispatcher>,
    partial_window: usize,
    error_callback: Arc<SyncRwLock<Option<PipelineErrorCallback>>>,
    source: SharedSource,
) {
    let mut partials = RepeatedPartialWindow::new(partial_window);
    let mut fatal = false;

    loop {
        tokio::select! {
            event = stream.events.recv() => {
                let Some(event) = event else { break };
                handle_event(event, &dispatcher, &mut partials, &error_callback).await;
            }
            Some(err) = stream.errors.recv() => {
                fatal = fatal || err.is_fatal();
                surface_error(&error_callback, err).await;
            }
        }
    }

    // Drain any error that raced the channel close.
    while let Ok(err) = stream.errors.try_recv() {
        fatal = fatal || err.is_fatal();
        surface_error(&error_callback, err).await;
    }

    if fatal {
        // Unintentional teardown releases the microphone too; an explicit
        // start() is required to retry.
        dispatcher.reset();
        release_source(&source).await;
    }

    debug!("Event loop finished");
}

async fn handle_event(
    event: TranscriptEvent,
    dispatcher: &Arc<UtteranceDispatcher>,
    partials: &mut RepeatedPartialWindow,
    error_callback: &Arc<SyncRwLock<Option<PipelineErrorCallback>>>,
) {
    match event {
        TranscriptEvent::SessionStarted { session_id } => {
            info!("Session established: {session_id}");
        }
        TranscriptEvent::Partial { text, .. } => {
            // The pattern window is not evaluated while a dispatch is in
            // flight.
            if dispatcher.is_dispatching() {
                debug!("Skipping partial during dispatch");
                return;
            }

            if let Some(repeated) = partials.observe(&text) {
                dispatcher
                    .on_finalize_trigger(FinalizeTrigger::RepeatedPartialPattern {
                        text: repeated,
                    })
                    .await;
            }
        }
        TranscriptEvent::Committed { text, .. } => {
            partials.on_committed();
            dispatcher.on_committed_fragment(&text);
        }
        TranscriptEvent::ConfigAck => {
            debug!("Remote VAD config acknowledged");
        }
        TranscriptEvent::Error { code, message } => {
            surface_error(
                error_callback,
                VoiceError::Connection(format!("service error ({code}): {message}")),
            )
            .await;
        }
    }
}

async fn surface_error(
    error_callback: &Arc<SyncRwLock<Option<PipelineErrorCallback>>>,
    err: VoiceError,
) {
    warn!("{err}");
    let callback = error_callback.read().clone();
    if let Some(callback) = callback {
        callback(err).await;
    }
}
