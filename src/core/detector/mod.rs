//! Utterance finalization detection.
//!
//! Two independent heuristics decide the speaker has stopped talking: a
//! quiet timer since the last committed fragment (armed by the accumulator,
//! see `core::dispatcher`) and the repeated-partial pattern implemented here.
//! Either may fire; the accumulator's in-flight lock serializes them.

use std::collections::VecDeque;

use tracing::debug;

/// Signal that an utterance should be finalized. Ephemeral, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeTrigger {
    /// The quiet window elapsed with no new committed fragment.
    TimerExpired,
    /// The service re-emitted the same partial enough times in a row.
    RepeatedPartialPattern { text: String },
}

/// Length difference beyond which a partial counts as having diverged from
/// the locked text, releasing the refire lock.
const LOCK_LENGTH_DELTA: usize = 4;

/// Rolling window over recent partial transcripts.
///
/// Fires when the window fills with identical non-empty texts. A lock
/// remembers the last text that fired so continued silence (the service
/// re-emitting the same stale partial) does not refire; the lock clears once
/// the partial diverges meaningfully or a fresh committed fragment arrives.
pub struct RepeatedPartialWindow {
    capacity: usize,
    window: VecDeque<String>,
    lock: Option<String>,
}

impl RepeatedPartialWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            window: VecDeque::with_capacity(capacity),
            lock: None,
        }
    }

    /// Observe one partial transcript. Returns the repeated text when the
    /// pattern fires.
    pub fn observe(&mut self, text: &str) -> Option<String> {
        self.maybe_release_lock(text);

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(text.to_string());

        if self.window.len() < self.capacity {
            return None;
        }

        let first = &self.window[0];
        if first.is_empty() || !self.window.iter().all(|entry| entry == first) {
            return None;
        }

        if self.lock.as_deref() == Some(first.as_str()) {
            debug!("Repeated-partial pattern already fired for this text; holding");
            return None;
        }

        let fired = first.clone();
        self.lock = Some(fired.clone());
        self.window.clear();
        debug!("Repeated-partial pattern fired: '{fired}'");
        Some(fired)
    }

    /// A fresh committed fragment resets the stream: clear the window and
    /// release the refire lock.
    pub fn on_committed(&mut self) {
        self.window.clear();
        self.lock = None;
    }

    fn maybe_release_lock(&mut self, text: &str) {
        if let Some(locked) = &self.lock {
            let delta = locked.len().abs_diff(text.len());
            if delta > LOCK_LENGTH_DELTA {
                debug!("Partial diverged from locked text; releasing pattern lock");
                self.lock = None;
            }
        }
    }
}
