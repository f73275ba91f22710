//! Pure domain logic for the DQ console quarantine editor.
//!
//! This crate holds the I/O-free state of a quarantine edit session: the
//! data model the backend declares, the cell edit tracker, the per-cell AI
//! suggestion lifecycle with its grid-override reconciler, the bulk rule
//! two-phase machine, and the autosave debounce policy. Everything here is
//! deterministic and directly unit-testable; networking, pagination, and
//! etag custody live in `dqc-client`.

pub mod autosave;
pub mod edits;
pub mod model;
pub mod rule;
pub mod suggest;

pub use autosave::{AutosaveConfig, AutosaveDebouncer};
pub use edits::{EditTracker, PendingEdit};
pub use model::{
    CellKey, CellStatus, Confidence, ManifestError, QuarantineManifest, QuarantineRow,
    RowDecodeError, DQ_STATUS_SUFFIX, ROW_ID_COLUMN,
};
pub use rule::{ColumnRuleFix, RuleError, RuleFlow, RulePhase, RulePreview};
pub use suggest::{CellOverride, FetchDecision, SuggestError, Suggestion, SuggestionCell};
