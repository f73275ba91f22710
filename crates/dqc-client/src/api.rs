//! Backend contract for the quarantine edit session.
//!
//! The DQ backend performs the actual analysis, suggestion generation, and
//! bulk fixing; this module defines the contract the engine consumes. The
//! contract is a trait so orchestration code runs unchanged against the
//! shipped HTTP adapter or an in-memory fake.
//!
//! # Error taxonomy
//!
//! Callers branch on [`ApiError`] variants, not on transport details:
//! permission failures must not be retried, `SessionOpen` is terminal for
//! the dialog instance ("nothing to edit"), and `ConcurrencyConflict` is
//! recovered only by refreshing the session before the next write - never
//! by retrying with the stale token.

use async_trait::async_trait;
use dqc_core::model::Confidence;
use dqc_core::{CellKey, ColumnRuleFix, PendingEdit, QuarantineManifest, QuarantineRow, Suggestion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by backend operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ApiError {
    /// The caller lacks access to the file or organization. Never retried;
    /// distinct from "nothing to edit".
    #[error("access denied: {message}")]
    Permission {
        /// Backend-provided detail.
        message: String,
    },

    /// No quarantined data exists, or the file is in an invalid state for
    /// editing. Terminal for this dialog instance.
    #[error("session cannot be opened: {message}")]
    SessionOpen {
        /// Backend-provided detail.
        message: String,
    },

    /// The presented etag no longer matches the server's current state.
    /// The caller must refresh before any further write.
    #[error("version conflict: {message}")]
    ConcurrencyConflict {
        /// Backend-provided detail.
        message: String,
    },

    /// The backend throttled the request.
    #[error("rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds until the limit resets.
        retry_after_secs: u64,
    },

    /// Transport-level failure. Writes that fail this way leave their edits
    /// pending.
    #[error("network error: {0}")]
    Network(String),

    /// The backend rejected the request for any other reason.
    #[error("backend error ({status_code}): {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Response body or status text.
        message: String,
    },

    /// The request was malformed and was rejected before (or instead of)
    /// reaching the backend.
    #[error("validation error: {0}")]
    Validation(String),
}

impl ApiError {
    /// Returns `true` for an etag mismatch.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Returns `true` if retrying the same call can succeed without caller
    /// intervention (transient transport failures and throttling).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }
}

/// Everything the backend returns when a session opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSessionResponse {
    /// Shape of the edit session.
    pub manifest: QuarantineManifest,
    /// Opaque identifier scoping bulk operations to this session.
    pub session_id: String,
    /// Initial optimistic-concurrency token.
    pub etag: String,
    /// First page of quarantined rows.
    pub rows: Vec<QuarantineRow>,
    /// Cursor for the next page, absent when the first page is the last.
    pub next_cursor: Option<String>,
}

/// One page of quarantined rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowPage {
    /// Rows in stable cursor order.
    pub rows: Vec<QuarantineRow>,
    /// Cursor for the next page, absent when exhausted.
    pub next_cursor: Option<String>,
}

/// Confirmation of a persisted edit batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosaveOutcome {
    /// The new token the client must adopt for its next write.
    pub etag: String,
    /// Cells the backend confirmed as written.
    pub saved: Vec<CellKey>,
}

/// Request for an AI-suggested fix for one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestFixRequest {
    /// Row the cell belongs to.
    pub row_id: String,
    /// Column of the cell.
    pub column: String,
    /// The cell's current raw value.
    pub current_value: String,
    /// The rule that quarantined the cell, when the view knows it.
    pub rule_id: Option<String>,
    /// The violation message attached to the cell, when the view knows it.
    pub issue_message: Option<String>,
}

/// An AI-suggested fix for one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestFixResponse {
    /// Suggested value; `None` or empty means "clear the value".
    pub suggestion: Option<String>,
    /// Confidence tier.
    pub confidence: Confidence,
    /// Model-provided reasoning.
    pub reasoning: String,
}

impl SuggestFixResponse {
    /// Converts the wire response into the engine's suggestion type.
    #[must_use]
    pub fn into_suggestion(self) -> Suggestion {
        Suggestion {
            value: self.suggestion,
            confidence: self.confidence,
            reasoning: self.reasoning,
        }
    }
}

/// One sampled cell sent to the rule generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCell {
    /// Row the cell belongs to.
    pub row_id: String,
    /// The cell's current raw value.
    pub value: String,
}

/// Request to generate-and-preview a column rule against a loaded sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePreviewRequest {
    /// Target column.
    pub column: String,
    /// Natural-language description of the transformation.
    pub description: String,
    /// The currently loaded quarantined cells for the column. A sample, not
    /// the full dataset.
    pub sample: Vec<SampleCell>,
}

/// Result of rule generation. Advisory only; nothing was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePreviewResponse {
    /// Per-sampled-cell effects.
    pub fixes: Vec<ColumnRuleFix>,
    /// Source of the generated rule, for transparency.
    pub rule_source: String,
}

/// One step of the apply-to-all loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRuleRequest {
    /// Session scoping the bulk operation.
    pub session_id: String,
    /// Target column.
    pub column: String,
    /// Natural-language description of the transformation.
    pub description: String,
    /// Cursor from the previous step; absent on the first call.
    pub cursor: Option<String>,
    /// Etag from the previous step's response (or the session's current etag
    /// on the first call).
    pub etag: String,
}

/// Result of one apply-to-all step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRuleOutcome {
    /// Rows fixed by this step.
    pub rows_affected: u64,
    /// Cursor for the next step, absent when the loop is done.
    pub next_cursor: Option<String>,
    /// Token to present on the next step (and to adopt as the session etag).
    pub new_etag: String,
}

/// The backend operations the engine consumes.
///
/// All methods are read-only with respect to client state; custody of the
/// etag and the loaded row set belongs to the session client.
#[async_trait]
pub trait QuarantineApi: Send + Sync {
    /// Opens a quarantine edit session for a file.
    ///
    /// # Errors
    ///
    /// [`ApiError::SessionOpen`] when the file has no quarantined rows or is
    /// in an invalid state; [`ApiError::Permission`] when the caller lacks
    /// access. The two must remain distinguishable.
    async fn open_session(&self, file_id: &str) -> Result<OpenSessionResponse, ApiError>;

    /// Fetches the next page of quarantined rows.
    ///
    /// Pagination is strictly forward and cursor-based; row order is stable
    /// across calls even under concurrent server-side mutation.
    ///
    /// # Errors
    ///
    /// Read-path failures degrade scrolling only; see [`ApiError`].
    async fn fetch_page(&self, session_id: &str, cursor: &str) -> Result<RowPage, ApiError>;

    /// Persists a batch of cell edits under the presented etag.
    ///
    /// # Errors
    ///
    /// [`ApiError::ConcurrencyConflict`] when the etag is stale; the caller
    /// must refresh before retrying.
    async fn autosave(
        &self,
        session_id: &str,
        etag: &str,
        edits: &[PendingEdit],
    ) -> Result<AutosaveOutcome, ApiError>;

    /// Submits the file for full DQ reprocessing.
    ///
    /// # Errors
    ///
    /// See [`ApiError`]; the orchestrator never submits while edits are
    /// known to be unsaved.
    async fn submit_reprocess(&self, file_id: &str) -> Result<(), ApiError>;

    /// Fetches an AI-suggested fix for one cell.
    ///
    /// # Errors
    ///
    /// Failures surface inline in the suggestion popover and leave the
    /// cell's actual value untouched.
    async fn suggest_fix(&self, request: &SuggestFixRequest)
        -> Result<SuggestFixResponse, ApiError>;

    /// Generates a column rule and previews its effect on a sample.
    /// Never mutates server state.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    async fn preview_rule(
        &self,
        request: &RulePreviewRequest,
    ) -> Result<RulePreviewResponse, ApiError>;

    /// Applies a generated rule to all rows, one cursor-paginated step at a
    /// time.
    ///
    /// # Errors
    ///
    /// [`ApiError::ConcurrencyConflict`] aborts the caller's loop; partial
    /// progress must be reported, not discarded.
    async fn apply_rule(&self, request: &ApplyRuleRequest) -> Result<ApplyRuleOutcome, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApiError::Permission {
            message: "not a member of org 7".to_string(),
        };
        assert_eq!(err.to_string(), "access denied: not a member of org 7");

        let err = ApiError::ConcurrencyConflict {
            message: "expected e5".to_string(),
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("version conflict"));

        let err = ApiError::RateLimited {
            retry_after_secs: 30,
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_permission_and_session_open_distinguishable() {
        let denied = ApiError::Permission {
            message: "no".to_string(),
        };
        let empty = ApiError::SessionOpen {
            message: "no quarantined rows".to_string(),
        };
        assert_ne!(denied, empty);
        assert!(!denied.is_transient());
        assert!(!empty.is_transient());
    }

    #[test]
    fn test_suggest_response_into_suggestion_preserves_fields() {
        let response = SuggestFixResponse {
            suggestion: Some("Acme Corp".to_string()),
            confidence: Confidence::High,
            reasoning: "Normalized casing".to_string(),
        };
        let suggestion = response.into_suggestion();
        assert_eq!(suggestion.value.as_deref(), Some("Acme Corp"));
        assert_eq!(suggestion.committed_value(), "Acme Corp");
    }
}
