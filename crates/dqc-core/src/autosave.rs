//! Autosave debounce policy.
//!
//! Autosave must not fire on every keystroke: the pipeline flushes only
//! after edit activity pauses for a configured quiet period. The debouncer
//! is pure over caller-supplied instants so the policy is testable without
//! sleeping and the driving loop owns the clock.

use std::time::{Duration, Instant};

/// Configuration for autosave batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    /// Quiet period after the last edit before a flush is due.
    pub debounce: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(800),
        }
    }
}

impl AutosaveConfig {
    /// Creates a configuration with a custom quiet period.
    #[must_use]
    pub const fn with_debounce(debounce: Duration) -> Self {
        Self { debounce }
    }
}

/// Tracks when the next debounced flush is due.
///
/// Each edit pushes the deadline out; the deadline holds until it either
/// fires or is disarmed (explicit flush, editor close).
#[derive(Debug, Clone)]
pub struct AutosaveDebouncer {
    config: AutosaveConfig,
    deadline: Option<Instant>,
}

impl AutosaveDebouncer {
    /// Creates a disarmed debouncer.
    #[must_use]
    pub const fn new(config: AutosaveConfig) -> Self {
        Self {
            config,
            deadline: None,
        }
    }

    /// Records edit activity at `now`, arming (or re-arming) the deadline.
    pub fn note_edit(&mut self, now: Instant) {
        self.deadline = Some(now + self.config.debounce);
    }

    /// Returns `true` if the quiet period has elapsed and a flush is due.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Consumes a due deadline. Returns `true` exactly when the caller
    /// should flush now.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }

    /// Drops the armed deadline (explicit flush already ran, or the editor
    /// is closing).
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Returns `true` if a deadline is armed.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The armed deadline, for callers that schedule a wakeup.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
