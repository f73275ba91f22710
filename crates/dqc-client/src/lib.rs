//! Async session protocol for the DQ console quarantine editor.
//!
//! This crate wires the pure state in `dqc-core` to a DQ backend: the
//! backend contract and its HTTP adapter, the session client that owns
//! pagination and the optimistic-concurrency token, and the editor
//! orchestrator that a grid view and toolbar compose against.
//!
//! # Layering
//!
//! ```text
//!   grid view / toolbar (out of scope)
//!            │
//!            ▼
//!   QuarantineEditor ──── EditTracker, SuggestionCell, RuleFlow (dqc-core)
//!            │
//!            ▼
//!   SessionClient  ◄──── sole custodian of the etag
//!            │
//!            ▼
//!   QuarantineApi trait ──── HttpQuarantineApi | test fakes
//! ```

pub mod api;
pub mod config;
pub mod editor;
pub mod http;
pub mod session;

pub use api::{
    ApiError, ApplyRuleOutcome, ApplyRuleRequest, AutosaveOutcome, OpenSessionResponse,
    QuarantineApi, RowPage, RulePreviewRequest, RulePreviewResponse, SampleCell,
    SuggestFixRequest, SuggestFixResponse,
};
pub use config::{ConfigError, ConsoleConfig};
pub use editor::{EditorError, QuarantineEditor, SuggestContext};
pub use http::HttpQuarantineApi;
pub use session::{ApplyStep, PageFetch, SessionClient};
