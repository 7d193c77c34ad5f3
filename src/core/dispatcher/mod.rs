//! Utterance accumulator and dispatcher.
//!
//! Accumulates committed transcript fragments into a pending utterance,
//! accepts finalize triggers from both detection heuristics, and guarantees
//! at-most-once dispatch per distinct utterance. All buffer/state mutation
//! happens synchronously before the asynchronous dialogue call is issued
//! (commit-before-await), which is what makes it safe to leave both
//! heuristics armed against each other.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::detector::FinalizeTrigger;
use crate::errors::{VoiceError, VoiceResult};

/// The external dialogue collaborator: receives one finalized utterance per
/// invocation.
pub type DialogueDispatcher =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = VoiceResult<()>> + Send>> + Send + Sync>;

/// Async callback for dispatch failures.
pub type DispatchErrorCallback =
    Arc<dyn Fn(VoiceError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Mutable accumulation state, guarded by one mutex.
struct UtteranceState {
    /// Committed fragments joined by single spaces.
    pending: String,
    /// The immediately preceding fragment, for duplicate-delivery suppression.
    last_fragment: String,
    /// Text of the most recently dispatched utterance. Rejects a second
    /// finalize on text that already went out.
    processed_marker: String,
    /// Handle of the armed quiet timer, if any.
    quiet_timer: Option<JoinHandle<()>>,
}

/// Race-safe holder of the pending utterance.
pub struct UtteranceDispatcher {
    state: Mutex<UtteranceState>,
    /// In-flight lock: at most one dispatch executes at a time.
    dispatching: AtomicBool,
    quiet_window: Duration,
    dialogue: Mutex<Option<DialogueDispatcher>>,
    error_callback: Mutex<Option<DispatchErrorCallback>>,
}

impl UtteranceDispatcher {
    pub fn new(quiet_window: Duration) -> Self {
        Self {
            state: Mutex::new(UtteranceState {
                pending: String::new(),
                last_fragment: String::new(),
                processed_marker: String::new(),
                quiet_timer: None,
            }),
            dispatching: AtomicBool::new(false),
            quiet_window,
            dialogue: Mutex::new(None),
            error_callback: Mutex::new(None),
        }
    }

    /// Register the dialogue collaborator invoked with finalized utterances.
    pub fn set_dialogue_dispatcher(&self, dispatcher: Option<DialogueDispatcher>) {
        *self.dialogue.lock() = dispatcher;
    }

    /// Register a callback for dispatch failures.
    pub fn set_error_callback(&self, callback: Option<DispatchErrorCallback>) {
        *self.error_callback.lock() = callback;
    }

    /// Whether a dispatch is currently in flight. Both heuristics disarm
    /// while this is true.
    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::Acquire)
    }

    /// Current pending utterance text.
    pub fn pending_utterance(&self) -> String {
        self.state.lock().pending.clone()
    }

    /// Append a committed fragment and rearm the quiet timer.
    ///
    /// Blank fragments and repeats of the immediately preceding fragment are
    /// ignored. While a dispatch is in flight the timer is intentionally left
    /// unarmed so it cannot race the outstanding request.
    pub fn on_committed_fragment(self: &Arc<Self>, text: &str) {
        let fragment = text.trim();
        if fragment.is_empty() {
            debug!("Ignoring blank committed fragment");
            return;
        }

        let mut state = self.state.lock();
        if state.last_fragment == fragment {
            debug!("Ignoring duplicate committed fragment: '{fragment}'");
            return;
        }

        if !state.pending.is_empty() {
            state.pending.push(' ');
        }
        state.pending.push_str(fragment);
        state.last_fragment = fragment.to_string();
        debug!("Pending utterance: '{}'", state.pending);

        if self.dispatching.load(Ordering::Acquire) {
            debug!("Dispatch in flight; leaving quiet timer unarmed");
            return;
        }

        self.rearm_quiet_timer(&mut state);
    }

    /// Entry point for both finalization heuristics.
    ///
    /// Guards, in order: a dispatch already in flight; a blank candidate; a
    /// candidate equal to the processed marker (in which case the stale
    /// pending buffer is also cleared to stop timer churn). Passing all
    /// three commits the dispatch synchronously, then awaits the dialogue
    /// collaborator.
    pub async fn on_finalize_trigger(self: &Arc<Self>, trigger: FinalizeTrigger) {
        let snapshot = {
            let mut state = self.state.lock();

            if self.dispatching.load(Ordering::Acquire) {
                debug!("Finalize trigger ignored: dispatch already in flight");
                return;
            }

            let candidate = match &trigger {
                FinalizeTrigger::TimerExpired => state.pending.trim().to_string(),
                // The pattern heuristic exists for the case where the service
                // stalls without committing; with nothing committed, the
                // repeated partial itself is the utterance.
                FinalizeTrigger::RepeatedPartialPattern { text } => {
                    if state.pending.trim().is_empty() {
                        text.trim().to_string()
                    } else {
                        state.pending.trim().to_string()
                    }
                }
            };

            if candidate.is_empty() {
                debug!("Finalize trigger ignored: nothing to dispatch");
                return;
            }

            if candidate == state.processed_marker {
                state.pending.clear();
                state.last_fragment.clear();
                if let Some(handle) = state.quiet_timer.take() {
                    handle.abort();
                }
                debug!("Finalize trigger ignored: utterance already dispatched");
                return;
            }

            // Commit before await: any event arriving during the dialogue
            // call sees fully-updated state.
            self.dispatching.store(true, Ordering::Release);
            state.pending.clear();
            state.last_fragment.clear();
            if let Some(handle) = state.quiet_timer.take() {
                handle.abort();
            }
            state.processed_marker = candidate.clone();
            candidate
        };

        info!("Dispatching utterance via {trigger:?}: '{snapshot}'");

        let dialogue = self.dialogue.lock().clone();
        let result = match dialogue {
            Some(dialogue) => dialogue(snapshot).await,
            None => {
                warn!("No dialogue dispatcher registered; utterance dropped");
                Ok(())
            }
        };

        self.dispatching.store(false, Ordering::Release);

        if let Err(err) = result {
            // The processed marker stays set: a failed dispatch is never
            // retried against a possibly stale or malformed utterance.
            let err = match err {
                VoiceError::Dispatch(_) => err,
                other => VoiceError::Dispatch(other.to_string()),
            };
            warn!("{err}");

            let callback = self.error_callback.lock().clone();
            if let Some(callback) = callback {
                callback(err).await;
            }
        }
    }

    /// Clear all accumulation state and stop the timer. Called when the
    /// capture period ends; an in-flight dispatch is left to finish on its
    /// own.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.last_fragment.clear();
        state.processed_marker.clear();
        if let Some(handle) = state.quiet_timer.take() {
            handle.abort();
        }
    }

    fn rearm_quiet_timer(self: &Arc<Self>, state: &mut UtteranceState) {
        if let Some(handle) = state.quiet_timer.take() {
            handle.abort();
        }

        let dispatcher = Arc::clone(self);
        let window = self.quiet_window;
        state.quiet_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;

            if dispatcher.is_dispatching() {
                debug!("Quiet timer expired during dispatch; ignoring");
                return;
            }

            dispatcher
                .on_finalize_trigger(FinalizeTrigger::TimerExpired)
                .await;
        }));
    }
}
