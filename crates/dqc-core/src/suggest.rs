//! Per-cell AI suggestion state machine and grid override reconciliation.
//!
//! Each quarantined cell carries an independent suggestion lifecycle:
//!
//! ```text
//!           begin_fetch            resolve
//!   ┌──────┐ ────────► ┌─────────┐ ────────► ┌───────────┐
//!   │ Idle │           │ Loading │           │ Suggested │
//!   └──────┘ ◄──────── └─────────┘           └───────────┘
//!      ▲        fail                               │
//!      └───────────────────────────────────────────┘
//!                     accept / reject
//! ```
//!
//! Re-triggering a fetch while one is in flight is a no-op, and a cached
//! suggestion is reused for the whole open/close cycle of the popover -
//! only `accept` or `reject` clears it, so the next open fetches fresh.
//! Invalid transitions (resolving without a fetch, accepting without a
//! suggestion) are rejected with [`SuggestError::InvalidTransition`].
//!
//! # Grid override
//!
//! Accepting a suggestion commits the value through the normal edit path,
//! but the rendering layer may take one or more renders to reflect it. The
//! [`CellOverride`] machine keeps the accepted value on screen until the
//! renderer's own value *arrives*: the override is discarded only when the
//! observed value equals the accepted one, so an unrelated stale update
//! cannot prematurely clear it and flash the old value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Confidence;

/// An AI-suggested fix for one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Suggested replacement value. `None` means "the fix is to clear the
    /// value".
    pub value: Option<String>,
    /// Confidence tier for the suggestion.
    pub confidence: Confidence,
    /// Model-provided reasoning, shown verbatim.
    pub reasoning: String,
}

impl Suggestion {
    /// The value that accepting this suggestion commits. `None` normalizes
    /// to the empty string - an accept always resolves to a concrete value.
    #[must_use]
    pub fn committed_value(&self) -> String {
        self.value.clone().unwrap_or_default()
    }
}

/// Errors from suggestion lifecycle transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SuggestError {
    /// The requested action is not valid in the cell's current state.
    #[error("invalid suggestion transition from {from_state} via {action}")]
    InvalidTransition {
        /// The current state name.
        from_state: &'static str,
        /// The attempted action.
        action: &'static str,
    },
}

/// Outcome of asking the machine to start a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    /// No fetch outstanding and nothing cached: the caller should issue the
    /// request now.
    Start,
    /// A request is already in flight; do not issue a second one.
    AlreadyLoading,
    /// A suggestion is cached for this open/close cycle; reuse it.
    Cached,
}

/// Suggestion lifecycle state for one cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuggestionCell {
    /// No suggestion fetched; only the trigger affordance is shown.
    #[default]
    Idle,
    /// Suggestion request in flight.
    Loading,
    /// A suggestion is cached and displayed.
    Suggested(Suggestion),
}

impl SuggestionCell {
    /// Returns the state name used in error messages.
    #[must_use]
    pub const fn state_name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Loading => "Loading",
            Self::Suggested(_) => "Suggested",
        }
    }

    /// Requests a fetch. Transitions `Idle -> Loading` and tells the caller
    /// whether to actually issue the request.
    pub fn begin_fetch(&mut self) -> FetchDecision {
        match self {
            Self::Idle => {
                *self = Self::Loading;
                FetchDecision::Start
            },
            Self::Loading => FetchDecision::AlreadyLoading,
            Self::Suggested(_) => FetchDecision::Cached,
        }
    }

    /// Completes an in-flight fetch with a suggestion.
    ///
    /// # Errors
    ///
    /// Returns [`SuggestError::InvalidTransition`] unless the cell is
    /// `Loading`.
    pub fn resolve(&mut self, suggestion: Suggestion) -> Result<(), SuggestError> {
        match self {
            Self::Loading => {
                *self = Self::Suggested(suggestion);
                Ok(())
            },
            other => Err(SuggestError::InvalidTransition {
                from_state: other.state_name(),
                action: "resolve",
            }),
        }
    }

    /// Records a failed fetch, returning the cell to `Idle` so the user can
    /// retry. The cell's actual value is unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`SuggestError::InvalidTransition`] unless the cell is
    /// `Loading`.
    pub fn fail(&mut self) -> Result<(), SuggestError> {
        match self {
            Self::Loading => {
                *self = Self::Idle;
                Ok(())
            },
            other => Err(SuggestError::InvalidTransition {
                from_state: other.state_name(),
                action: "fail",
            }),
        }
    }

    /// Accepts the cached suggestion, returning the value to commit through
    /// the edit path. The cache is cleared so a future open fetches fresh.
    ///
    /// # Errors
    ///
    /// Returns [`SuggestError::InvalidTransition`] unless the cell is
    /// `Suggested`.
    pub fn accept(&mut self) -> Result<String, SuggestError> {
        match std::mem::take(self) {
            Self::Suggested(suggestion) => Ok(suggestion.committed_value()),
            other => {
                let from_state = other.state_name();
                *self = other;
                Err(SuggestError::InvalidTransition {
                    from_state,
                    action: "accept",
                })
            },
        }
    }

    /// Discards the cached suggestion without committing anything.
    ///
    /// # Errors
    ///
    /// Returns [`SuggestError::InvalidTransition`] unless the cell is
    /// `Suggested`.
    pub fn reject(&mut self) -> Result<(), SuggestError> {
        match self {
            Self::Suggested(_) => {
                *self = Self::Idle;
                Ok(())
            },
            other => Err(SuggestError::InvalidTransition {
                from_state: other.state_name(),
                action: "reject",
            }),
        }
    }

    /// Returns the cached suggestion, if any.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&Suggestion> {
        match self {
            Self::Suggested(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` if a fetch is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// Local display override for one cell, pending the renderer's echo.
///
/// Two states: no override, or an accepted value awaiting arrival. The
/// override is discarded only when the observed rendered value equals the
/// awaited value - not on the next value change of any kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellOverride {
    /// No override; the renderer's value is authoritative.
    #[default]
    Clear,
    /// An accepted value is displayed locally until the renderer echoes it.
    Awaiting {
        /// The value that was committed and must arrive.
        value: String,
    },
}

impl CellOverride {
    /// Installs an override for a just-committed value.
    pub fn set(&mut self, value: impl Into<String>) {
        *self = Self::Awaiting {
            value: value.into(),
        };
    }

    /// Feeds the renderer's current value for this cell. Returns `true` if
    /// the override was discarded because the awaited value arrived.
    pub fn observe(&mut self, rendered: &str) -> bool {
        match self {
            Self::Awaiting { value } if value == rendered => {
                *self = Self::Clear;
                true
            },
            _ => false,
        }
    }

    /// Resolves what the view should display given the renderer's value.
    #[must_use]
    pub fn display<'a>(&'a self, rendered: &'a str) -> &'a str {
        match self {
            Self::Awaiting { value } => value,
            Self::Clear => rendered,
        }
    }

    /// Returns `true` if an override is installed.
    #[must_use]
    pub const fn is_awaiting(&self) -> bool {
        matches!(self, Self::Awaiting { .. })
    }
}
