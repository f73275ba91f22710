//! Cell edit bookkeeping for one open editor.
//!
//! The tracker records which cells have unsaved changes and which cells were
//! saved during the current session. It performs no I/O and knows nothing
//! about autosave batching or rendering, so the save policy can change
//! without touching edit semantics and tests can exercise the bookkeeping
//! directly.
//!
//! # Invariants
//!
//! - A cell is pending from `record_edit` until `confirm_saved` names it.
//! - `confirm_saved` moves a batch from pending to saved in one mutation; an
//!   observer holding a snapshot never sees a confirmed cell as neither
//!   pending nor saved.
//! - A failed save leaves the batch pending; the tracker has no failure path
//!   of its own.
//! - Saved markers survive refreshes and are cleared only by `clear` (session
//!   reset).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::CellKey;

/// One unsaved cell change, keyed by `(row_id, column)`.
///
/// Values are always strings; the column's semantic type is irrelevant at
/// this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEdit {
    /// The cell being edited.
    pub key: CellKey,
    /// The new raw value the user committed.
    pub value: String,
}

/// Tracks pending (unsaved) and saved (this-session) cell edits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditTracker {
    pending: BTreeMap<CellKey, String>,
    saved: BTreeSet<CellKey>,
}

impl EditTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a cell pending with `value`.
    ///
    /// Re-editing an already pending cell overwrites the value
    /// (last-write-wins per cell; no history).
    pub fn record_edit(
        &mut self,
        row_id: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.pending
            .insert(CellKey::new(row_id, column), value.into());
    }

    /// Returns `true` if the cell has an unsaved change.
    #[must_use]
    pub fn is_pending(&self, row_id: &str, column: &str) -> bool {
        self.pending
            .contains_key(&CellKey::new(row_id, column))
    }

    /// Returns the pending value for a cell, if any.
    #[must_use]
    pub fn pending_value(&self, row_id: &str, column: &str) -> Option<&str> {
        self.pending
            .get(&CellKey::new(row_id, column))
            .map(String::as_str)
    }

    /// Returns `true` if this exact cell was committed and confirmed during
    /// the current session.
    #[must_use]
    pub fn is_saved(&self, row_id: &str, column: &str) -> bool {
        self.saved.contains(&CellKey::new(row_id, column))
    }

    /// Number of distinct pending cells.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if no edits are pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Snapshot of the current pending batch in stable `(row_id, column)`
    /// order. This is what the autosave pipeline sends.
    #[must_use]
    pub fn pending_batch(&self) -> Vec<PendingEdit> {
        self.pending
            .iter()
            .map(|(key, value)| PendingEdit {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    /// Moves a confirmed batch from pending to saved.
    ///
    /// Cells named in `batch` that are no longer pending (the user re-edited
    /// and a newer value is waiting) keep their pending entry: only cells
    /// whose pending value is the one that was actually confirmed transition.
    /// Passing the [`PendingEdit`]s returned by [`Self::pending_batch`] gives
    /// exact semantics.
    pub fn confirm_saved(&mut self, batch: &[PendingEdit]) {
        for edit in batch {
            let still_current = self
                .pending
                .get(&edit.key)
                .is_some_and(|v| *v == edit.value);
            if still_current {
                self.pending.remove(&edit.key);
            }
            self.saved.insert(edit.key.clone());
        }
    }

    /// Discards all pending and saved state. Used when the editor instance
    /// is torn down; never called on refresh.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.saved.clear();
    }
}
