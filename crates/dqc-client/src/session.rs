//! Session client: the authoritative loaded view of one file's quarantined
//! rows, and custody of the optimistic-concurrency token.
//!
//! One instance exists per open editor. It owns:
//!
//! - the manifest and the loaded row set, appended to by strictly-forward
//!   cursor pagination (row order is stable across pages because the cursor
//!   is anchored to row identity, not offsets);
//! - the `session_id` scoping bulk server-side operations;
//! - the etag. Every mutating call presents the last adopted etag and, on
//!   success, adopts the returned one. No other component reads or writes
//!   the token; the apply-to-all loop chains it by calling back into
//!   [`SessionClient::apply_rule_step`].
//!
//! A failed write never adopts anything: on [`ApiError::ConcurrencyConflict`]
//! the caller must [`SessionClient::refresh`] before the next write. Retrying
//! with the stale token would mask another writer's changes.
//!
//! # Refresh policy
//!
//! `refresh` replaces the manifest, rows, cursor, session id, and etag, and
//! deliberately knows nothing about pending edits: the edit tracker is owned
//! by the orchestrator and survives a refresh untouched, so unsaved values
//! stay pending and the next autosave presents them against the refreshed
//! etag (merge-keep-local).

use std::collections::HashMap;
use std::sync::Arc;

use dqc_core::{CellKey, PendingEdit, QuarantineManifest, QuarantineRow};
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApplyRuleRequest, QuarantineApi};

/// Outcome of a page fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageFetch {
    /// A page was appended to the loaded set.
    Appended {
        /// Number of rows appended.
        appended: usize,
    },
    /// No cursor remains; the dataset is fully loaded.
    Exhausted,
}

/// One step of the apply-to-all loop, with the etag already adopted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyStep {
    /// Rows fixed by this step.
    pub rows_affected: u64,
    /// Cursor for the next step, absent when the loop is done.
    pub next_cursor: Option<String>,
}

/// Client-side state of one open quarantine edit session.
pub struct SessionClient {
    api: Arc<dyn QuarantineApi>,
    file_id: String,
    session_id: String,
    etag: String,
    manifest: QuarantineManifest,
    rows: Vec<QuarantineRow>,
    row_index: HashMap<String, usize>,
    next_cursor: Option<String>,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("file_id", &self.file_id)
            .field("session_id", &self.session_id)
            .field("etag", &self.etag)
            .field("rows", &self.rows)
            .field("next_cursor", &self.next_cursor)
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    /// Opens a session for `file_id`: manifest, first page, session id, and
    /// initial etag.
    ///
    /// # Errors
    ///
    /// [`ApiError::SessionOpen`] when there is nothing to edit,
    /// [`ApiError::Permission`] when access is denied; the two stay
    /// distinguishable for the view.
    pub async fn open(
        api: Arc<dyn QuarantineApi>,
        file_id: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let file_id = file_id.into();
        let opened = api.open_session(&file_id).await?;
        opened
            .manifest
            .validate()
            .map_err(|e| ApiError::Network(format!("malformed manifest: {e}")))?;

        info!(
            file_id,
            session_id = %opened.session_id,
            quarantined = opened.manifest.row_count_quarantined,
            first_page = opened.rows.len(),
            "quarantine session opened"
        );

        let mut client = Self {
            api,
            file_id,
            session_id: opened.session_id,
            etag: opened.etag,
            manifest: opened.manifest,
            rows: Vec::new(),
            row_index: HashMap::new(),
            next_cursor: opened.next_cursor,
        };
        client.append_rows(opened.rows);
        Ok(client)
    }

    /// Fetches and appends the next page, if a cursor remains.
    ///
    /// Strictly forward: each call consumes the stored cursor and adopts the
    /// returned one. Calling again after exhaustion is a cheap no-op, which
    /// is what makes rapid repeated scroll-boundary signals safe.
    ///
    /// # Errors
    ///
    /// Read-path failures leave the loaded set and cursor unchanged so the
    /// fetch can be retried.
    pub async fn fetch_next_page(&mut self) -> Result<PageFetch, ApiError> {
        let Some(cursor) = self.next_cursor.clone() else {
            return Ok(PageFetch::Exhausted);
        };
        let page = self.api.fetch_page(&self.session_id, &cursor).await?;
        let appended = page.rows.len();
        self.append_rows(page.rows);
        self.next_cursor = page.next_cursor;
        debug!(
            appended,
            loaded = self.rows.len(),
            more = self.next_cursor.is_some(),
            "appended quarantine page"
        );
        Ok(PageFetch::Appended { appended })
    }

    /// Persists a pending-edit batch under the current etag.
    ///
    /// On success the new etag is adopted, confirmed values are written into
    /// the cached rows, and the confirmed cell keys are returned for the
    /// tracker. On failure nothing is adopted and nothing is written; the
    /// batch stays pending with the caller.
    ///
    /// # Errors
    ///
    /// [`ApiError::ConcurrencyConflict`] when the etag is stale; the caller
    /// must [`Self::refresh`] before retrying. Transient failures may be
    /// retried with the same etag once the transport recovers.
    pub async fn autosave(&mut self, batch: &[PendingEdit]) -> Result<Vec<CellKey>, ApiError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        debug!(cells = batch.len(), "autosave batch begin");
        let outcome = match self
            .api
            .autosave(&self.session_id, &self.etag, batch)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_conflict() {
                    warn!("autosave rejected: session version is stale, refresh required");
                } else {
                    warn!(error = %err, "autosave failed, edits remain pending");
                }
                return Err(err);
            },
        };

        debug!(
            saved = outcome.saved.len(),
            "autosave confirmed, adopting new session version"
        );
        self.etag = outcome.etag;

        // Fold confirmed values into the cached rows so a scroll-back shows
        // the saved value without a refetch. Cached statuses keep whatever
        // the server last reported; the in-session saved marker owns the
        // "fixed" indicator until a refresh.
        for edit in batch {
            if outcome.saved.contains(&edit.key) {
                if let Some(row) = self.row_mut(&edit.key.row_id) {
                    row.set_value(&edit.key.column, edit.value.clone());
                }
            }
        }
        Ok(outcome.saved)
    }

    /// Runs one step of the apply-to-all loop, presenting the session's
    /// current etag and adopting the returned one.
    ///
    /// The cursor chain belongs to the caller (it is loop-local state); the
    /// etag chain lives here because the token is shared with autosave.
    ///
    /// # Errors
    ///
    /// [`ApiError::ConcurrencyConflict`] aborts the caller's loop; the etag
    /// is not adopted.
    pub async fn apply_rule_step(
        &mut self,
        column: &str,
        description: &str,
        cursor: Option<String>,
    ) -> Result<ApplyStep, ApiError> {
        let request = ApplyRuleRequest {
            session_id: self.session_id.clone(),
            column: column.to_string(),
            description: description.to_string(),
            cursor,
            etag: self.etag.clone(),
        };
        let outcome = self.api.apply_rule(&request).await?;
        self.etag = outcome.new_etag;
        debug!(
            rows_affected = outcome.rows_affected,
            more = outcome.next_cursor.is_some(),
            "apply-to-all step complete"
        );
        Ok(ApplyStep {
            rows_affected: outcome.rows_affected,
            next_cursor: outcome.next_cursor,
        })
    }

    /// Re-fetches manifest, first page, session id, and etag, discarding the
    /// loaded row set. Pending edits are not this type's concern and survive
    /// with the orchestrator's tracker (see module docs).
    ///
    /// # Errors
    ///
    /// On failure the existing loaded state is left untouched.
    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        let opened = self.api.open_session(&self.file_id).await?;
        opened
            .manifest
            .validate()
            .map_err(|e| ApiError::Network(format!("malformed manifest: {e}")))?;
        info!(
            file_id = %self.file_id,
            session_id = %opened.session_id,
            quarantined = opened.manifest.row_count_quarantined,
            "session refreshed"
        );
        self.session_id = opened.session_id;
        self.etag = opened.etag;
        self.manifest = opened.manifest;
        self.rows.clear();
        self.row_index.clear();
        self.next_cursor = opened.next_cursor;
        self.append_rows(opened.rows);
        Ok(())
    }

    /// The manifest for this session.
    #[must_use]
    pub const fn manifest(&self) -> &QuarantineManifest {
        &self.manifest
    }

    /// The loaded rows, in stable cursor order.
    #[must_use]
    pub fn rows(&self) -> &[QuarantineRow] {
        &self.rows
    }

    /// Looks up a loaded row by identity.
    #[must_use]
    pub fn row(&self, row_id: &str) -> Option<&QuarantineRow> {
        self.row_index.get(row_id).map(|&i| &self.rows[i])
    }

    /// The file this session edits.
    #[must_use]
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// The backend-assigned session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns `true` if more pages remain.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }

    fn row_mut(&mut self, row_id: &str) -> Option<&mut QuarantineRow> {
        self.row_index.get(row_id).map(|&i| &mut self.rows[i])
    }

    fn append_rows(&mut self, rows: Vec<QuarantineRow>) {
        for row in rows {
            // A row re-sent under concurrent server-side mutation replaces
            // its earlier copy instead of duplicating it; row_id is the only
            // correlation key.
            if let Some(&i) = self.row_index.get(&row.row_id) {
                self.rows[i] = row;
            } else {
                self.row_index.insert(row.row_id.clone(), self.rows.len());
                self.rows.push(row);
            }
        }
    }
}
