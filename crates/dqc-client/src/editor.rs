//! Quarantine editor orchestrator.
//!
//! The single stateful façade a grid view and toolbar compose against. It
//! owns one [`SessionClient`], one [`EditTracker`], the per-cell suggestion
//! machines, the grid overrides, and the bulk rule flow - one instance per
//! open editor dialog, no globals, no cross-session sharing.
//!
//! # Concurrency model
//!
//! The editor is a single-owner object: every operation takes `&mut self`,
//! so no two operations overlap and in particular no two autosaves are ever
//! in flight for one session (each would consume the shared etag). Edits
//! committed between flushes are picked up by the autosave drain loop, which
//! re-snapshots the pending batch after each confirmed write - a save
//! "requested" while one runs is therefore queued behind it by construction,
//! against the newly adopted etag.
//!
//! Closing the editor never abandons a started write: [`Self::close`] awaits
//! the final flush and refuses to close if it fails, so the pending count
//! remains a truthful record of what has not reached the server. Suggestion
//! and preview requests are advisory reads and need no such care.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dqc_core::{
    AutosaveConfig, AutosaveDebouncer, CellKey, CellOverride, CellStatus, EditTracker,
    FetchDecision, PendingEdit, QuarantineManifest, QuarantineRow, RuleError, RuleFlow,
    RulePreview, SuggestError, Suggestion, SuggestionCell,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{
    ApiError, QuarantineApi, RulePreviewRequest, SampleCell, SuggestFixRequest,
};
use crate::config::ConsoleConfig;
use crate::session::{PageFetch, SessionClient};

/// Errors surfaced by editor operations.
#[derive(Debug, Error)]
pub enum EditorError {
    /// The editor was closed; open a fresh one to keep working.
    #[error("editor is closed")]
    Closed,

    /// The column may not be edited. Caught before any network call.
    #[error("column is not editable: {column}")]
    NotEditable {
        /// The rejected column.
        column: String,
    },

    /// The row is not in the loaded set.
    #[error("row is not loaded: {row_id}")]
    UnknownRow {
        /// The unknown row id.
        row_id: String,
    },

    /// Suggestions are offered only for quarantined cells.
    #[error("cell is not quarantined: {row_id}:{column}")]
    NotQuarantined {
        /// Row of the rejected cell.
        row_id: String,
        /// Column of the rejected cell.
        column: String,
    },

    /// A backend operation failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A suggestion lifecycle transition was invalid.
    #[error(transparent)]
    Suggest(#[from] SuggestError),

    /// A bulk rule lifecycle transition was invalid.
    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// Optional context the view attaches to a suggestion request when it knows
/// which rule quarantined the cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuggestContext {
    /// The rule that flagged the cell.
    pub rule_id: Option<String>,
    /// The violation message attached to the cell.
    pub issue_message: Option<String>,
}

/// One open quarantine editor.
pub struct QuarantineEditor {
    api: Arc<dyn QuarantineApi>,
    session: SessionClient,
    tracker: EditTracker,
    debouncer: AutosaveDebouncer,
    suggestions: HashMap<CellKey, SuggestionCell>,
    overrides: HashMap<CellKey, CellOverride>,
    rule: RuleFlow,
    saving: bool,
    fetching_page: bool,
    closed: bool,
    last_save_error: Option<ApiError>,
}

impl std::fmt::Debug for QuarantineEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuarantineEditor")
            .field("saving", &self.saving)
            .field("fetching_page", &self.fetching_page)
            .field("closed", &self.closed)
            .field("last_save_error", &self.last_save_error)
            .finish_non_exhaustive()
    }
}

impl QuarantineEditor {
    /// Opens an editor for `file_id`.
    ///
    /// # Errors
    ///
    /// [`ApiError::SessionOpen`] when the file has nothing to edit,
    /// [`ApiError::Permission`] when access is denied.
    pub async fn open(
        api: Arc<dyn QuarantineApi>,
        config: &ConsoleConfig,
        file_id: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let session = SessionClient::open(Arc::clone(&api), file_id).await?;
        Ok(Self {
            api,
            session,
            tracker: EditTracker::new(),
            debouncer: AutosaveDebouncer::new(AutosaveConfig::with_debounce(
                config.autosave_debounce(),
            )),
            suggestions: HashMap::new(),
            overrides: HashMap::new(),
            rule: RuleFlow::new(),
            saving: false,
            fetching_page: false,
            closed: false,
            last_save_error: None,
        })
    }

    // ------------------------------------------------------------------
    // Read model
    // ------------------------------------------------------------------

    /// The session manifest.
    #[must_use]
    pub const fn manifest(&self) -> &QuarantineManifest {
        self.session.manifest()
    }

    /// Loaded rows in stable order.
    #[must_use]
    pub fn rows(&self) -> &[QuarantineRow] {
        self.session.rows()
    }

    /// Total quarantined rows server-side, independent of how many are
    /// loaded.
    #[must_use]
    pub const fn quarantined_total(&self) -> u64 {
        self.session.manifest().row_count_quarantined
    }

    /// Number of cells with unsaved changes.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.tracker.pending_count()
    }

    /// Returns `true` while an autosave is running.
    #[must_use]
    pub const fn is_saving(&self) -> bool {
        self.saving
    }

    /// Returns `true` while a page fetch is running.
    #[must_use]
    pub const fn is_fetching_page(&self) -> bool {
        self.fetching_page
    }

    /// Returns `true` if more pages remain server-side.
    #[must_use]
    pub const fn has_more_rows(&self) -> bool {
        self.session.has_more()
    }

    /// The most recent autosave failure, cleared by the next successful
    /// flush. The toolbar renders this next to the pending count.
    #[must_use]
    pub const fn last_save_error(&self) -> Option<&ApiError> {
        self.last_save_error.as_ref()
    }

    /// Returns `true` if the cell has an unsaved change.
    #[must_use]
    pub fn is_cell_pending(&self, row_id: &str, column: &str) -> bool {
        self.tracker.is_pending(row_id, column)
    }

    /// Returns `true` if the cell should show the "fixed" indicator.
    ///
    /// Two independent facts drive it: the in-session saved marker and the
    /// server-declared `edited` status. The marker wins immediately after a
    /// save, before any refresh reflects the server's status field.
    #[must_use]
    pub fn is_cell_saved(&self, row_id: &str, column: &str) -> bool {
        if self.tracker.is_saved(row_id, column) {
            return true;
        }
        self.session
            .row(row_id)
            .is_some_and(|row| row.status(column) == CellStatus::Edited)
    }

    /// Returns `true` if the cell is currently flagged as a violation. The
    /// suggestion affordance is shown only for these cells.
    #[must_use]
    pub fn is_cell_quarantined(&self, row_id: &str, column: &str) -> bool {
        self.session
            .row(row_id)
            .is_some_and(|row| row.status(column) == CellStatus::Quarantined)
    }

    /// Resolves what the view should display for a cell, given the value the
    /// rendering layer currently holds.
    ///
    /// Precedence: unsaved pending value, then an accepted-suggestion
    /// override still awaiting the renderer's echo, then the renderer's own
    /// value.
    #[must_use]
    pub fn display_value<'a>(&'a self, row_id: &str, column: &str, rendered: &'a str) -> &'a str {
        if let Some(value) = self.tracker.pending_value(row_id, column) {
            return value;
        }
        if let Some(overridden) = self.overrides.get(&CellKey::new(row_id, column)) {
            return overridden.display(rendered);
        }
        rendered
    }

    /// Feeds the rendering layer's current value for a cell, retiring the
    /// local override once the accepted value has actually arrived. An
    /// unrelated stale update leaves the override in place.
    pub fn observe_rendered(&mut self, row_id: &str, column: &str, rendered: &str) {
        let key = CellKey::new(row_id, column);
        if let Some(overridden) = self.overrides.get_mut(&key) {
            if overridden.observe(rendered) {
                self.overrides.remove(&key);
            }
        }
    }

    /// The suggestion state for a cell ([`SuggestionCell::Idle`] when none).
    #[must_use]
    pub fn suggestion_state(&self, row_id: &str, column: &str) -> &SuggestionCell {
        const IDLE: &SuggestionCell = &SuggestionCell::Idle;
        self.suggestions
            .get(&CellKey::new(row_id, column))
            .unwrap_or(IDLE)
    }

    /// The bulk rule flow state.
    #[must_use]
    pub const fn rule_flow(&self) -> &RuleFlow {
        &self.rule
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    /// Commits a cell edit: optimistic and immediate in the tracker, flushed
    /// asynchronously once edit activity settles.
    ///
    /// # Errors
    ///
    /// [`EditorError::NotEditable`] / [`EditorError::UnknownRow`] before
    /// anything is recorded; no network is involved here.
    pub fn commit_cell_edit(
        &mut self,
        row_id: &str,
        column: &str,
        value: impl Into<String>,
    ) -> Result<(), EditorError> {
        self.ensure_open()?;
        self.ensure_editable(column)?;
        if self.session.row(row_id).is_none() {
            return Err(EditorError::UnknownRow {
                row_id: row_id.to_string(),
            });
        }
        self.tracker.record_edit(row_id, column, value);
        self.debouncer.note_edit(Instant::now());
        Ok(())
    }

    /// Flushes pending edits now, draining until nothing is pending.
    ///
    /// Returns the number of cells confirmed saved. A failed flush leaves
    /// every unconfirmed edit pending and records the failure for the
    /// toolbar.
    ///
    /// # Errors
    ///
    /// [`ApiError::ConcurrencyConflict`] requires [`Self::refresh`] before
    /// the next write; transient failures may simply be retried.
    pub async fn autosave_now(&mut self) -> Result<usize, EditorError> {
        self.ensure_open()?;
        self.debouncer.disarm();
        let mut confirmed_total = 0;
        loop {
            let batch = self.tracker.pending_batch();
            if batch.is_empty() {
                break;
            }
            self.saving = true;
            let result = self.session.autosave(&batch).await;
            self.saving = false;
            match result {
                Ok(saved) => {
                    let confirmed: Vec<PendingEdit> = batch
                        .into_iter()
                        .filter(|edit| saved.contains(&edit.key))
                        .collect();
                    confirmed_total += confirmed.len();
                    self.tracker.confirm_saved(&confirmed);
                },
                Err(err) => {
                    self.last_save_error = Some(err.clone());
                    return Err(err.into());
                },
            }
        }
        self.last_save_error = None;
        Ok(confirmed_total)
    }

    /// Drives the debounced autosave pipeline. Call on a timer; flushes only
    /// once edit activity has paused for the configured quiet period.
    ///
    /// # Errors
    ///
    /// Same as [`Self::autosave_now`].
    pub async fn tick_autosave(&mut self) -> Result<Option<usize>, EditorError> {
        if self.debouncer.fire(Instant::now()) {
            self.autosave_now().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Signals that the view scrolled to the loaded boundary. Fetches the
    /// next page iff a cursor remains; repeated rapid signals are safe
    /// because an exhausted cursor is a no-op and operations never overlap.
    ///
    /// # Errors
    ///
    /// Read-path failures leave the loaded set intact; scrolling can retry.
    pub async fn on_scroll_boundary(&mut self) -> Result<(), EditorError> {
        self.ensure_open()?;
        if !self.session.has_more() {
            return Ok(());
        }
        self.fetching_page = true;
        let result = self.session.fetch_next_page().await;
        self.fetching_page = false;
        match result {
            Ok(PageFetch::Appended { .. } | PageFetch::Exhausted) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Re-fetches manifest, rows, and etag. Pending edits survive (they stay
    /// pending and the next autosave presents them against the refreshed
    /// etag); cached suggestions and overrides are dropped because the
    /// underlying values may have changed server-side.
    ///
    /// Returns the number of pending edits preserved.
    ///
    /// # Errors
    ///
    /// On failure the previous loaded state is kept.
    pub async fn refresh(&mut self) -> Result<usize, EditorError> {
        self.ensure_open()?;
        self.session.refresh().await?;
        self.suggestions.clear();
        self.overrides.clear();
        let preserved = self.tracker.pending_count();
        if preserved > 0 {
            info!(preserved, "refresh kept unsaved edits pending");
        }
        Ok(preserved)
    }

    /// Submits the file for full DQ reprocessing and closes the editor.
    ///
    /// Pending edits are flushed first; if the flush fails, reprocessing is
    /// NOT submitted (never reprocess a session known to have unsaved
    /// writes) and the editor stays open with edits intact.
    ///
    /// # Errors
    ///
    /// Flush or submission failures leave the editor open.
    pub async fn reprocess(&mut self) -> Result<(), EditorError> {
        self.ensure_open()?;
        self.autosave_now().await?;
        self.api.submit_reprocess(self.session.file_id()).await?;
        info!(file_id = %self.session.file_id(), "reprocess submitted, closing editor");
        self.shutdown();
        Ok(())
    }

    /// Flushes pending edits and closes the editor. A failed flush refuses
    /// to close so no write is silently abandoned; the caller may retry or
    /// drop the editor outright to discard.
    ///
    /// # Errors
    ///
    /// Same as [`Self::autosave_now`].
    pub async fn close(&mut self) -> Result<(), EditorError> {
        if self.closed {
            return Ok(());
        }
        self.autosave_now().await?;
        self.shutdown();
        Ok(())
    }

    // ------------------------------------------------------------------
    // AI suggestions
    // ------------------------------------------------------------------

    /// Opens the suggestion popover for a quarantined cell, fetching a
    /// suggested fix if none is cached for this open/close cycle.
    ///
    /// While a fetch is outstanding no second request is issued; closing and
    /// reopening the popover reuses the cached suggestion until accept or
    /// reject clears it.
    ///
    /// # Errors
    ///
    /// [`EditorError::NotQuarantined`] for cells without the affordance; a
    /// failed fetch surfaces inline and leaves the cell value untouched.
    pub async fn open_suggestion(
        &mut self,
        row_id: &str,
        column: &str,
        context: SuggestContext,
    ) -> Result<Suggestion, EditorError> {
        self.ensure_open()?;
        if !self.is_cell_quarantined(row_id, column) {
            return Err(EditorError::NotQuarantined {
                row_id: row_id.to_string(),
                column: column.to_string(),
            });
        }

        // The model fixes what the user is looking at, so an unsaved pending
        // value takes precedence over the cached row value.
        let current_value = self
            .tracker
            .pending_value(row_id, column)
            .map(str::to_string)
            .or_else(|| {
                self.session
                    .row(row_id)
                    .map(|row| row.value(column).to_string())
            })
            .unwrap_or_default();
        let key = CellKey::new(row_id, column);

        match self.suggestions.entry(key.clone()).or_default().begin_fetch() {
            FetchDecision::Cached => {
                if let Some(cached) = self
                    .suggestions
                    .get(&key)
                    .and_then(SuggestionCell::suggestion)
                {
                    return Ok(cached.clone());
                }
            },
            // `Start` issues the request below. `AlreadyLoading` can only be
            // left behind by a fetch future that was dropped mid-flight
            // (operations never overlap under exclusive access), so the
            // request is simply issued again.
            FetchDecision::Start | FetchDecision::AlreadyLoading => {},
        }

        let request = SuggestFixRequest {
            row_id: row_id.to_string(),
            column: column.to_string(),
            current_value,
            rule_id: context.rule_id,
            issue_message: context.issue_message,
        };
        let result = self.api.suggest_fix(&request).await;
        let cell = self.suggestions.entry(key).or_default();
        match result {
            Ok(response) => {
                let suggestion = response.into_suggestion();
                cell.resolve(suggestion.clone())?;
                debug!(
                    row_id,
                    column,
                    confidence = %suggestion.confidence,
                    "suggestion fetched"
                );
                Ok(suggestion)
            },
            Err(err) => {
                cell.fail()?;
                warn!(row_id, column, error = %err, "suggestion fetch failed");
                Err(err.into())
            },
        }
    }

    /// Accepts the cached suggestion for a cell, committing it through the
    /// same edit path as manual typing. An empty suggestion commits the
    /// empty string. Returns the committed value.
    ///
    /// The accepted value is also installed as a grid override so the view
    /// shows it immediately; the override retires when the renderer echoes
    /// the value back through [`Self::observe_rendered`].
    ///
    /// # Errors
    ///
    /// [`SuggestError::InvalidTransition`] when no suggestion is cached;
    /// [`EditorError::NotEditable`] for read-only columns.
    pub fn accept_suggestion(&mut self, row_id: &str, column: &str) -> Result<String, EditorError> {
        self.ensure_open()?;
        self.ensure_editable(column)?;
        let key = CellKey::new(row_id, column);
        let value = self.suggestions.entry(key.clone()).or_default().accept()?;
        self.tracker.record_edit(row_id, column, value.clone());
        self.overrides.entry(key).or_default().set(value.clone());
        self.debouncer.note_edit(Instant::now());
        Ok(value)
    }

    /// Rejects the cached suggestion for a cell, clearing it so a future
    /// open fetches fresh.
    ///
    /// # Errors
    ///
    /// [`SuggestError::InvalidTransition`] when no suggestion is cached.
    pub fn reject_suggestion(&mut self, row_id: &str, column: &str) -> Result<(), EditorError> {
        self.ensure_open()?;
        let key = CellKey::new(row_id, column);
        self.suggestions.entry(key).or_default().reject()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bulk rules
    // ------------------------------------------------------------------

    /// Generates a column rule from a natural-language description and
    /// previews its effect on the currently loaded quarantined sample.
    /// Never mutates server state.
    ///
    /// The returned preview records how many rows it sampled; callers must
    /// present it as a sample of the dataset, not a guarantee, since the
    /// server will also fix rows never shown here.
    ///
    /// # Errors
    ///
    /// [`RuleError::EmptyDescription`] / [`EditorError::NotEditable`] before
    /// any network call; backend failures move the flow to `Failed` while
    /// keeping any earlier preview visible.
    pub async fn preview_rule(
        &mut self,
        column: &str,
        description: &str,
    ) -> Result<RulePreview, EditorError> {
        self.ensure_open()?;
        self.ensure_editable(column)?;
        self.rule.begin_preview(description)?;

        let sample: Vec<SampleCell> = self
            .session
            .rows()
            .iter()
            .filter(|row| row.status(column) == CellStatus::Quarantined)
            .map(|row| SampleCell {
                row_id: row.row_id.clone(),
                // Pending edits are part of what the user sees, so the
                // sample reflects them.
                value: self
                    .tracker
                    .pending_value(&row.row_id, column)
                    .unwrap_or_else(|| row.value(column))
                    .to_string(),
            })
            .collect();
        let sampled_rows = sample.len();

        let request = RulePreviewRequest {
            column: column.to_string(),
            description: description.to_string(),
            sample,
        };
        match self.api.preview_rule(&request).await {
            Ok(response) => {
                let preview = RulePreview {
                    fixes: response.fixes,
                    rule_source: response.rule_source,
                    sampled_rows,
                };
                self.rule.preview_ready(preview.clone())?;
                debug!(column, sampled_rows, "rule preview generated");
                Ok(preview)
            },
            Err(err) => {
                self.rule.preview_failed(err.to_string())?;
                Err(err.into())
            },
        }
    }

    /// Applies the previewed rule to every quarantined cell of the column,
    /// driving the server-side pagination loop and chaining the
    /// concurrency token across every call.
    ///
    /// Returns the total rows fixed. On completion the session is refreshed,
    /// since rows and counts changed outside the edit-tracking path.
    ///
    /// # Errors
    ///
    /// A failure at any step aborts the loop with the partial total
    /// preserved in [`Self::rule_flow`]; a conflict means another writer
    /// touched the session and the flow must restart from a refresh.
    pub async fn apply_rule_to_all(
        &mut self,
        column: &str,
        description: &str,
    ) -> Result<u64, EditorError> {
        self.ensure_open()?;
        self.rule.begin_apply()?;
        info!(column, "apply-to-all starting");

        let mut cursor: Option<String> = None;
        loop {
            let step = match self
                .session
                .apply_rule_step(column, description, cursor)
                .await
            {
                Ok(step) => step,
                Err(err) => {
                    self.rule.apply_failed(err.to_string())?;
                    warn!(
                        column,
                        fixed_before_failure = self.rule.total_fixed(),
                        error = %err,
                        "apply-to-all aborted"
                    );
                    return Err(err.into());
                },
            };
            self.rule.record_progress(step.rows_affected)?;
            cursor = step.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        let total = self.rule.apply_complete()?;
        info!(column, total, "apply-to-all complete, refreshing session");
        self.session.refresh().await?;
        self.suggestions.clear();
        self.overrides.clear();
        Ok(total)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_open(&self) -> Result<(), EditorError> {
        if self.closed {
            Err(EditorError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_editable(&self, column: &str) -> Result<(), EditorError> {
        if self.session.manifest().is_editable(column) {
            Ok(())
        } else {
            Err(EditorError::NotEditable {
                column: column.to_string(),
            })
        }
    }

    fn shutdown(&mut self) {
        self.closed = true;
        self.tracker.clear();
        self.suggestions.clear();
        self.overrides.clear();
        self.debouncer.disarm();
    }
}
