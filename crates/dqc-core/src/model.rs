//! Data model for a quarantine edit session.
//!
//! The backend exposes quarantined rows as flat maps: one entry per data
//! column plus a companion `<column>_dq_status` entry recording whether that
//! specific cell is currently flagged as a quality violation. This module
//! owns the decoded shape of that data and the manifest that describes the
//! session (column order, editable subset, quarantined row count).
//!
//! Everything here is pure data. Fetching, caching, and mutation policy live
//! in the client crate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the identity column present in every manifest.
///
/// `row_id` is stable for the lifetime of a row and is the only key used to
/// correlate a row across pagination, edit tracking, suggestions, and grid
/// reconciliation.
pub const ROW_ID_COLUMN: &str = "row_id";

/// Suffix marking a companion status field in the backend's flat row maps.
pub const DQ_STATUS_SUFFIX: &str = "_dq_status";

/// Per-cell quality status as declared by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    /// The cell is flagged as a quality violation.
    Quarantined,
    /// The cell was edited and persisted in some (possibly earlier) session.
    Edited,
    /// No outstanding flag on this cell.
    #[default]
    #[serde(other)]
    Clean,
}

impl CellStatus {
    /// Parses a status string from a flat row map. Unknown or absent values
    /// decode as [`CellStatus::Clean`].
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("quarantined") => Self::Quarantined,
            Some("edited") => Self::Edited,
            _ => Self::Clean,
        }
    }

    /// Returns the wire spelling of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quarantined => "quarantined",
            Self::Edited => "edited",
            Self::Clean => "clean",
        }
    }
}

/// Confidence tier attached to an AI-suggested fix.
///
/// Tiers are surfaced to the view with distinct treatments; the engine only
/// transports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// The model is confident the fix is correct.
    High,
    /// The fix is plausible but worth a look.
    Medium,
    /// The fix is a guess.
    Low,
}

impl Confidence {
    /// Returns the wire spelling of this tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one cell: `(row_id, column)`.
///
/// This is the key for pending edits, saved markers, suggestion state, and
/// grid overrides. Ordering is lexicographic on `(row_id, column)` so batch
/// iteration order is stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    /// Stable row identity, unique within the file.
    pub row_id: String,
    /// Column name.
    pub column: String,
}

impl CellKey {
    /// Creates a key from a row id and column name.
    #[must_use]
    pub fn new(row_id: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row_id, self.column)
    }
}

/// Errors produced while validating a manifest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    /// The manifest column list does not contain the identity column.
    #[error("manifest has no '{ROW_ID_COLUMN}' column")]
    MissingRowIdColumn,

    /// An editable column is not present in the column list.
    #[error("editable column not in manifest columns: {column}")]
    EditableNotInColumns {
        /// The offending editable column.
        column: String,
    },

    /// The identity column was declared editable.
    #[error("'{ROW_ID_COLUMN}' must not be editable")]
    RowIdEditable,
}

/// Server-declared shape of the edit session for one file.
///
/// Fetched once when a session opens; refreshed after server-side bulk
/// mutation (counts and row contents may change, column shape does not).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineManifest {
    /// Ordered column names, including the identity column.
    pub columns: Vec<String>,
    /// Subset of `columns` the user may edit.
    pub editable_columns: Vec<String>,
    /// Total rows with at least one quarantined cell, independent of how many
    /// rows are currently loaded client-side.
    pub row_count_quarantined: u64,
}

impl QuarantineManifest {
    /// Validates internal consistency of the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] if the identity column is missing, an
    /// editable column is unknown, or the identity column is editable.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if !self.columns.iter().any(|c| c == ROW_ID_COLUMN) {
            return Err(ManifestError::MissingRowIdColumn);
        }
        for column in &self.editable_columns {
            if column == ROW_ID_COLUMN {
                return Err(ManifestError::RowIdEditable);
            }
            if !self.columns.contains(column) {
                return Err(ManifestError::EditableNotInColumns {
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Returns `true` if `column` may be edited.
    #[must_use]
    pub fn is_editable(&self, column: &str) -> bool {
        self.editable_columns.iter().any(|c| c == column)
    }

    /// Iterates the data columns (everything except the identity column).
    pub fn data_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.as_str() != ROW_ID_COLUMN)
            .map(String::as_str)
    }
}

/// Errors produced while decoding a flat row map.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowDecodeError {
    /// The flat map has no `row_id` entry.
    #[error("row has no '{ROW_ID_COLUMN}' field")]
    MissingRowId,

    /// A cell value was not a scalar.
    #[error("non-scalar value for column {column}")]
    NonScalarValue {
        /// The column carrying the non-scalar value.
        column: String,
    },
}

/// One row of the quarantined dataset.
///
/// `values` holds the raw cell text per data column; `statuses` holds the
/// companion quality flags. Columns absent from either map decode as empty /
/// [`CellStatus::Clean`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRow {
    /// Stable row identity.
    pub row_id: String,
    /// Raw cell text keyed by column name.
    pub values: BTreeMap<String, String>,
    /// Quality status keyed by column name.
    pub statuses: BTreeMap<String, CellStatus>,
}

impl QuarantineRow {
    /// Decodes a row from the backend's flat map representation.
    ///
    /// Scalar values are stringified (`null` becomes the empty string);
    /// `*_dq_status` entries are split out into `statuses`.
    ///
    /// # Errors
    ///
    /// Returns [`RowDecodeError`] if `row_id` is absent or a value is an
    /// array or object.
    pub fn from_flat(
        flat: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, RowDecodeError> {
        let row_id = flat
            .get(ROW_ID_COLUMN)
            .and_then(scalar_to_string)
            .filter(|s| !s.is_empty())
            .ok_or(RowDecodeError::MissingRowId)?;

        let mut values = BTreeMap::new();
        let mut statuses = BTreeMap::new();
        for (key, value) in flat {
            if key == ROW_ID_COLUMN {
                continue;
            }
            let text = scalar_to_string(value).ok_or_else(|| RowDecodeError::NonScalarValue {
                column: key.clone(),
            })?;
            if let Some(column) = key.strip_suffix(DQ_STATUS_SUFFIX) {
                statuses.insert(column.to_string(), CellStatus::parse(Some(&text)));
            } else {
                values.insert(key.clone(), text);
            }
        }

        Ok(Self {
            row_id,
            values,
            statuses,
        })
    }

    /// Returns the raw text of a cell, or `""` if the column is absent.
    #[must_use]
    pub fn value(&self, column: &str) -> &str {
        self.values.get(column).map_or("", String::as_str)
    }

    /// Returns the quality status of a cell.
    #[must_use]
    pub fn status(&self, column: &str) -> CellStatus {
        self.statuses.get(column).copied().unwrap_or_default()
    }

    /// Overwrites the raw text of a cell.
    pub fn set_value(&mut self, column: &str, value: impl Into<String>) {
        self.values.insert(column.to_string(), value.into());
    }
}

/// Stringifies a scalar JSON value. `null` maps to `""`; arrays and objects
/// are rejected.
fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Null => Some(String::new()),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}
