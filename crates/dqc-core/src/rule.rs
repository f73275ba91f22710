//! Two-phase bulk rule lifecycle for one column.
//!
//! A bulk rule turns a natural-language description into a transformation
//! applied to every quarantined cell of one column. The flow has two phases:
//!
//! ```text
//!            begin_preview           preview_ready
//!   ┌──────┐ ───────────► ┌────────────┐ ───────────► ┌───────────┐
//!   │ Idle │              │ Previewing │              │ Previewed │
//!   └──────┘              └─────┬──────┘              └─────┬─────┘
//!                               │ preview_failed            │ begin_apply
//!                               ▼                           ▼
//!                         ┌────────┐   apply_failed   ┌──────────┐
//!                         │ Failed │ ◄─────────────── │ Applying │
//!                         └────────┘                  └────┬─────┘
//!                                                          │ apply_complete
//!                                                          ▼
//!                                                     ┌─────────┐
//!                                                     │ Applied │
//!                                                     └─────────┘
//! ```
//!
//! Preview is advisory: it runs against the currently loaded sample only and
//! never mutates server state. Apply is a sequential, cursor-chained,
//! etag-guarded server-side loop; this machine accounts for its progress so
//! a failure mid-loop reports the partial total instead of losing track.
//!
//! Failures never reset silently: the retained preview and the accumulated
//! `total_fixed` stay visible in the `Failed` state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The effect of the generated rule on one sampled cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRuleFix {
    /// Row the sampled cell belongs to.
    pub row_id: String,
    /// The cell's current value.
    pub original: String,
    /// The value the rule would produce.
    pub fixed: String,
}

/// Result of the generate-and-preview phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePreview {
    /// Per-sampled-cell effects.
    pub fixes: Vec<ColumnRuleFix>,
    /// Source of the generated rule, shown for transparency.
    pub rule_source: String,
    /// How many loaded rows the preview covered. The server applies the rule
    /// to rows never shown in preview, so callers must present the preview
    /// as a sample, not a guarantee.
    pub sampled_rows: usize,
}

/// Errors from bulk rule lifecycle transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    /// The requested action is not valid in the current phase.
    #[error("invalid rule transition from {from_state} via {action}")]
    InvalidTransition {
        /// The current phase name.
        from_state: &'static str,
        /// The attempted action.
        action: &'static str,
    },

    /// The rule description is empty or blank. Caught before any network
    /// call.
    #[error("rule description must not be empty")]
    EmptyDescription,
}

/// Phase of the bulk rule flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RulePhase {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Preview generation request in flight.
    Previewing,
    /// A preview is available; apply may start.
    Previewed,
    /// The apply-to-all loop is running.
    Applying {
        /// Rows fixed so far across completed loop steps.
        total_fixed: u64,
    },
    /// The apply-to-all loop completed.
    Applied {
        /// Total rows fixed.
        total_fixed: u64,
    },
    /// Preview or apply failed. Partial progress is preserved.
    Failed {
        /// Rows fixed before the failure (0 for preview failures).
        total_fixed: u64,
        /// Human-readable failure message.
        message: String,
    },
}

impl RulePhase {
    /// Returns the phase name used in error messages.
    #[must_use]
    pub const fn state_name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Previewing => "Previewing",
            Self::Previewed => "Previewed",
            Self::Applying { .. } => "Applying",
            Self::Applied { .. } => "Applied",
            Self::Failed { .. } => "Failed",
        }
    }
}

/// Bulk rule flow state for one column.
///
/// The retained preview outlives phase transitions: a failed apply keeps the
/// previewed fixes visible alongside the failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleFlow {
    phase: RulePhase,
    preview: Option<RulePreview>,
}

impl RuleFlow {
    /// Creates a flow in the idle phase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> &RulePhase {
        &self.phase
    }

    /// The retained preview, if one was generated.
    #[must_use]
    pub const fn preview(&self) -> Option<&RulePreview> {
        self.preview.as_ref()
    }

    /// Rows fixed so far (meaningful in `Applying`, `Applied`, and `Failed`).
    #[must_use]
    pub const fn total_fixed(&self) -> u64 {
        match self.phase {
            RulePhase::Applying { total_fixed }
            | RulePhase::Applied { total_fixed }
            | RulePhase::Failed { total_fixed, .. } => total_fixed,
            _ => 0,
        }
    }

    /// Returns `true` while a request or loop is outstanding.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self.phase, RulePhase::Previewing | RulePhase::Applying { .. })
    }

    /// Starts preview generation.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::EmptyDescription`] for a blank description
    /// (before any network call), or [`RuleError::InvalidTransition`] while
    /// a preview or apply is already outstanding.
    pub fn begin_preview(&mut self, description: &str) -> Result<(), RuleError> {
        if description.trim().is_empty() {
            return Err(RuleError::EmptyDescription);
        }
        if self.is_busy() {
            return Err(RuleError::InvalidTransition {
                from_state: self.phase.state_name(),
                action: "begin_preview",
            });
        }
        self.phase = RulePhase::Previewing;
        Ok(())
    }

    /// Completes preview generation.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidTransition`] unless the phase is
    /// `Previewing`.
    pub fn preview_ready(&mut self, preview: RulePreview) -> Result<(), RuleError> {
        if !matches!(self.phase, RulePhase::Previewing) {
            return Err(RuleError::InvalidTransition {
                from_state: self.phase.state_name(),
                action: "preview_ready",
            });
        }
        self.preview = Some(preview);
        self.phase = RulePhase::Previewed;
        Ok(())
    }

    /// Records a preview failure. A previously retained preview stays
    /// visible.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidTransition`] unless the phase is
    /// `Previewing`.
    pub fn preview_failed(&mut self, message: impl Into<String>) -> Result<(), RuleError> {
        if !matches!(self.phase, RulePhase::Previewing) {
            return Err(RuleError::InvalidTransition {
                from_state: self.phase.state_name(),
                action: "preview_failed",
            });
        }
        self.phase = RulePhase::Failed {
            total_fixed: 0,
            message: message.into(),
        };
        Ok(())
    }

    /// Starts the apply-to-all loop. Requires a generated preview.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidTransition`] unless the phase is
    /// `Previewed`.
    pub fn begin_apply(&mut self) -> Result<(), RuleError> {
        if !matches!(self.phase, RulePhase::Previewed) {
            return Err(RuleError::InvalidTransition {
                from_state: self.phase.state_name(),
                action: "begin_apply",
            });
        }
        self.phase = RulePhase::Applying { total_fixed: 0 };
        Ok(())
    }

    /// Accumulates one loop step's `rows_affected`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidTransition`] unless the phase is
    /// `Applying`.
    pub fn record_progress(&mut self, rows_affected: u64) -> Result<(), RuleError> {
        match &mut self.phase {
            RulePhase::Applying { total_fixed } => {
                *total_fixed += rows_affected;
                Ok(())
            },
            other => Err(RuleError::InvalidTransition {
                from_state: other.state_name(),
                action: "record_progress",
            }),
        }
    }

    /// Completes the apply-to-all loop.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidTransition`] unless the phase is
    /// `Applying`.
    pub fn apply_complete(&mut self) -> Result<u64, RuleError> {
        match self.phase {
            RulePhase::Applying { total_fixed } => {
                self.phase = RulePhase::Applied { total_fixed };
                Ok(total_fixed)
            },
            ref other => Err(RuleError::InvalidTransition {
                from_state: other.state_name(),
                action: "apply_complete",
            }),
        }
    }

    /// Aborts the loop on failure, preserving the partial total.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidTransition`] unless the phase is
    /// `Applying`.
    pub fn apply_failed(&mut self, message: impl Into<String>) -> Result<(), RuleError> {
        match self.phase {
            RulePhase::Applying { total_fixed } => {
                self.phase = RulePhase::Failed {
                    total_fixed,
                    message: message.into(),
                };
                Ok(())
            },
            ref other => Err(RuleError::InvalidTransition {
                from_state: other.state_name(),
                action: "apply_failed",
            }),
        }
    }
}
