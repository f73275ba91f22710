//! End-to-end editor flows against a stateful fake backend.
//!
//! The fake enforces the optimistic-concurrency contract the way the real
//! backend does: every mutating call must present the etag the fake last
//! returned, and anything else is rejected as a conflict. Tests that pass
//! here therefore demonstrate correct etag chaining, not just happy-path
//! plumbing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dqc_client::{
    ApiError, ApplyRuleOutcome, ApplyRuleRequest, AutosaveOutcome, ConsoleConfig, EditorError,
    OpenSessionResponse, QuarantineApi, QuarantineEditor, RowPage, RulePreviewRequest,
    RulePreviewResponse, SuggestContext, SuggestFixRequest, SuggestFixResponse,
};
use dqc_core::model::Confidence;
use dqc_core::{CellStatus, PendingEdit, QuarantineManifest, QuarantineRow, RulePhase};

fn row(row_id: &str, amount: &str, status: CellStatus) -> QuarantineRow {
    QuarantineRow {
        row_id: row_id.to_string(),
        values: BTreeMap::from([("amount".to_string(), amount.to_string())]),
        statuses: BTreeMap::from([("amount".to_string(), status)]),
    }
}

struct FakeState {
    etag_counter: u64,
    /// Row pages served by open (page 0) and fetch_page (page N via "cN").
    pages: Vec<Vec<QuarantineRow>>,
    /// `rows_affected` per remaining apply-to-all step.
    apply_steps: Vec<u64>,
    /// Injected failure for the next autosave call.
    fail_next_save: Option<ApiError>,
    /// Apply call ordinal (1-based) that should fail, if any.
    fail_apply_call: Option<usize>,
    suggest_response: SuggestFixResponse,
    // Observability for assertions.
    presented_etags: Vec<String>,
    suggest_calls: usize,
    apply_calls: usize,
    page_calls: usize,
    reprocess_calls: usize,
}

struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    fn new(pages: Vec<Vec<QuarantineRow>>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                etag_counter: 1,
                pages,
                apply_steps: Vec::new(),
                fail_next_save: None,
                fail_apply_call: None,
                suggest_response: SuggestFixResponse {
                    suggestion: Some("Acme Corp".to_string()),
                    confidence: Confidence::High,
                    reasoning: "Normalized casing".to_string(),
                },
                presented_etags: Vec::new(),
                suggest_calls: 0,
                apply_calls: 0,
                page_calls: 0,
                reprocess_calls: 0,
            }),
        })
    }

    fn current_etag(state: &FakeState) -> String {
        format!("e{}", state.etag_counter)
    }

    /// Simulates another writer mutating the dataset.
    fn external_write(&self) {
        self.state.lock().unwrap().etag_counter += 1;
    }

    fn check_etag(state: &mut FakeState, presented: &str) -> Result<(), ApiError> {
        state.presented_etags.push(presented.to_string());
        if presented == Self::current_etag(state) {
            Ok(())
        } else {
            Err(ApiError::ConcurrencyConflict {
                message: format!(
                    "expected {}, got {presented}",
                    Self::current_etag(state)
                ),
            })
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

#[async_trait]
impl QuarantineApi for FakeBackend {
    async fn open_session(&self, _file_id: &str) -> Result<OpenSessionResponse, ApiError> {
        self.with_state(|state| {
            let quarantined = state
                .pages
                .iter()
                .flatten()
                .filter(|r| {
                    r.statuses
                        .values()
                        .any(|s| *s == CellStatus::Quarantined)
                })
                .count() as u64;
            if state.pages.iter().all(Vec::is_empty) {
                return Err(ApiError::SessionOpen {
                    message: "no quarantined rows".to_string(),
                });
            }
            Ok(OpenSessionResponse {
                manifest: QuarantineManifest {
                    columns: vec!["row_id".to_string(), "amount".to_string()],
                    editable_columns: vec!["amount".to_string()],
                    row_count_quarantined: quarantined,
                },
                session_id: "s1".to_string(),
                etag: Self::current_etag(state),
                rows: state.pages[0].clone(),
                next_cursor: (state.pages.len() > 1).then(|| "c1".to_string()),
            })
        })
    }

    async fn fetch_page(&self, _session_id: &str, cursor: &str) -> Result<RowPage, ApiError> {
        self.with_state(|state| {
            state.page_calls += 1;
            let index: usize = cursor
                .strip_prefix('c')
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| ApiError::Network(format!("bad cursor: {cursor}")))?;
            let rows = state.pages.get(index).cloned().unwrap_or_default();
            let next_cursor = (index + 1 < state.pages.len()).then(|| format!("c{}", index + 1));
            Ok(RowPage { rows, next_cursor })
        })
    }

    async fn autosave(
        &self,
        _session_id: &str,
        etag: &str,
        edits: &[PendingEdit],
    ) -> Result<AutosaveOutcome, ApiError> {
        self.with_state(|state| {
            if let Some(err) = state.fail_next_save.take() {
                return Err(err);
            }
            Self::check_etag(state, etag)?;
            for edit in edits {
                for page in &mut state.pages {
                    for row in page.iter_mut() {
                        if row.row_id == edit.key.row_id {
                            row.values
                                .insert(edit.key.column.clone(), edit.value.clone());
                            row.statuses
                                .insert(edit.key.column.clone(), CellStatus::Edited);
                        }
                    }
                }
            }
            state.etag_counter += 1;
            Ok(AutosaveOutcome {
                etag: Self::current_etag(state),
                saved: edits.iter().map(|e| e.key.clone()).collect(),
            })
        })
    }

    async fn submit_reprocess(&self, _file_id: &str) -> Result<(), ApiError> {
        self.with_state(|state| {
            state.reprocess_calls += 1;
            Ok(())
        })
    }

    async fn suggest_fix(
        &self,
        _request: &SuggestFixRequest,
    ) -> Result<SuggestFixResponse, ApiError> {
        self.with_state(|state| {
            state.suggest_calls += 1;
            Ok(state.suggest_response.clone())
        })
    }

    async fn preview_rule(
        &self,
        request: &RulePreviewRequest,
    ) -> Result<RulePreviewResponse, ApiError> {
        let fixes = request
            .sample
            .iter()
            .map(|cell| dqc_core::ColumnRuleFix {
                row_id: cell.row_id.clone(),
                original: cell.value.clone(),
                fixed: cell.value.replace('O', "0"),
            })
            .collect();
        Ok(RulePreviewResponse {
            fixes,
            rule_source: "value.replace('O', '0')".to_string(),
        })
    }

    async fn apply_rule(&self, request: &ApplyRuleRequest) -> Result<ApplyRuleOutcome, ApiError> {
        self.with_state(|state| {
            state.apply_calls += 1;
            if state.fail_apply_call == Some(state.apply_calls) {
                return Err(ApiError::ConcurrencyConflict {
                    message: "bulk writer raced the session".to_string(),
                });
            }
            Self::check_etag(state, &request.etag)?;
            if state.apply_steps.is_empty() {
                return Err(ApiError::Network("apply script exhausted".to_string()));
            }
            let rows_affected = state.apply_steps.remove(0);
            state.etag_counter += 1;
            Ok(ApplyRuleOutcome {
                rows_affected,
                next_cursor: (!state.apply_steps.is_empty())
                    .then(|| format!("c{}", state.apply_calls)),
                new_etag: Self::current_etag(state),
            })
        })
    }
}

fn config() -> ConsoleConfig {
    ConsoleConfig::new("https://dq.example.com/api")
}

async fn open_editor(backend: &Arc<FakeBackend>) -> QuarantineEditor {
    QuarantineEditor::open(Arc::clone(backend) as Arc<dyn QuarantineApi>, &config(), "f1")
        .await
        .expect("session should open")
}

fn two_quarantined_rows() -> Vec<Vec<QuarantineRow>> {
    vec![vec![
        row("1", "1O0", CellStatus::Quarantined),
        row("2", "200", CellStatus::Quarantined),
    ]]
}

#[tokio::test]
async fn scenario_a_edit_then_autosave() {
    let backend = FakeBackend::new(two_quarantined_rows());
    let mut editor = open_editor(&backend).await;

    assert_eq!(editor.quarantined_total(), 2);
    editor.commit_cell_edit("1", "amount", "100").unwrap();
    assert!(editor.is_cell_pending("1", "amount"));
    assert_eq!(editor.pending_count(), 1);

    let saved = editor.autosave_now().await.unwrap();
    assert_eq!(saved, 1);
    assert!(!editor.is_cell_pending("1", "amount"));
    assert!(editor.is_cell_saved("1", "amount"));
    assert_eq!(editor.pending_count(), 0);
    backend.with_state(|state| {
        assert_eq!(state.presented_etags, vec!["e1".to_string()]);
    });
}

#[tokio::test]
async fn saved_marker_wins_before_status_refresh() {
    let backend = FakeBackend::new(two_quarantined_rows());
    let mut editor = open_editor(&backend).await;

    editor.commit_cell_edit("1", "amount", "100").unwrap();
    editor.autosave_now().await.unwrap();

    // The cached row still carries the pre-save status; the in-session
    // marker must drive the indicator anyway.
    assert!(editor.is_cell_quarantined("1", "amount"));
    assert!(editor.is_cell_saved("1", "amount"));
}

#[tokio::test]
async fn etag_chains_across_save_and_apply() {
    let backend = FakeBackend::new(two_quarantined_rows());
    backend.with_state(|state| state.apply_steps = vec![50]);
    let mut editor = open_editor(&backend).await;

    editor.commit_cell_edit("1", "amount", "100").unwrap();
    editor.autosave_now().await.unwrap();

    editor.preview_rule("amount", "strip letters").await.unwrap();
    editor.apply_rule_to_all("amount", "strip letters").await.unwrap();

    editor.commit_cell_edit("2", "amount", "300").unwrap();
    editor.autosave_now().await.unwrap();

    // Every mutating call presented exactly the previously returned etag.
    backend.with_state(|state| {
        assert_eq!(
            state.presented_etags,
            vec!["e1".to_string(), "e2".to_string(), "e3".to_string()]
        );
    });
}

#[tokio::test]
async fn scenario_b_apply_all_accumulates_and_terminates() {
    let backend = FakeBackend::new(two_quarantined_rows());
    backend.with_state(|state| state.apply_steps = vec![50, 30]);
    let mut editor = open_editor(&backend).await;

    let preview = editor.preview_rule("amount", "strip letters").await.unwrap();
    assert_eq!(preview.sampled_rows, 2);
    assert_eq!(preview.fixes[0].fixed, "100");

    let total = editor.apply_rule_to_all("amount", "strip letters").await.unwrap();
    assert_eq!(total, 80);
    assert_eq!(editor.rule_flow().total_fixed(), 80);
    // Exactly one call per server-side page.
    backend.with_state(|state| assert_eq!(state.apply_calls, 2));
}

#[tokio::test]
async fn apply_all_failure_preserves_partial_progress() {
    let backend = FakeBackend::new(two_quarantined_rows());
    backend.with_state(|state| {
        state.apply_steps = vec![50, 30];
        state.fail_apply_call = Some(2);
    });
    let mut editor = open_editor(&backend).await;

    editor.preview_rule("amount", "strip letters").await.unwrap();
    let err = editor
        .apply_rule_to_all("amount", "strip letters")
        .await
        .unwrap_err();
    assert!(matches!(err, EditorError::Api(ref e) if e.is_conflict()));
    assert_eq!(editor.rule_flow().total_fixed(), 50);
    assert!(matches!(
        editor.rule_flow().phase(),
        RulePhase::Failed { total_fixed: 50, .. }
    ));
    // The preview stays visible alongside the failure.
    assert!(editor.rule_flow().preview().is_some());
}

#[tokio::test]
async fn scenario_c_conflict_keeps_edits_pending_until_refresh() {
    let backend = FakeBackend::new(two_quarantined_rows());
    let mut editor = open_editor(&backend).await;

    // Another writer advances the server version behind our back.
    backend.external_write();

    editor.commit_cell_edit("1", "amount", "100").unwrap();
    let err = editor.autosave_now().await.unwrap_err();
    assert!(matches!(err, EditorError::Api(ref e) if e.is_conflict()));

    // Edits stay pending, the failure is surfaced, nothing was adopted.
    assert_eq!(editor.pending_count(), 1);
    assert!(editor.last_save_error().is_some_and(ApiError::is_conflict));

    // Refresh keeps the pending edit (merge-keep-local) and re-arms the
    // session with the current etag; the retry then lands.
    let preserved = editor.refresh().await.unwrap();
    assert_eq!(preserved, 1);
    assert_eq!(editor.pending_count(), 1);
    editor.autosave_now().await.unwrap();
    assert_eq!(editor.pending_count(), 0);
    assert!(editor.is_cell_saved("1", "amount"));
    assert!(editor.last_save_error().is_none());
}

#[tokio::test]
async fn scenario_d_accept_suggestion_commits_and_refetches_next_time() {
    let backend = FakeBackend::new(two_quarantined_rows());
    let mut editor = open_editor(&backend).await;

    let suggestion = editor
        .open_suggestion("1", "amount", SuggestContext::default())
        .await
        .unwrap();
    assert_eq!(suggestion.value.as_deref(), Some("Acme Corp"));
    assert_eq!(suggestion.confidence, Confidence::High);

    let committed = editor.accept_suggestion("1", "amount").unwrap();
    assert_eq!(committed, "Acme Corp");
    assert!(editor.is_cell_pending("1", "amount"));
    assert_eq!(editor.suggestion_state("1", "amount").state_name(), "Idle");

    // A subsequent open issues a fresh fetch: no stale cache reuse.
    editor
        .open_suggestion("1", "amount", SuggestContext::default())
        .await
        .unwrap();
    backend.with_state(|state| assert_eq!(state.suggest_calls, 2));
}

#[tokio::test]
async fn suggestion_cached_within_open_close_cycle() {
    let backend = FakeBackend::new(two_quarantined_rows());
    let mut editor = open_editor(&backend).await;

    editor
        .open_suggestion("1", "amount", SuggestContext::default())
        .await
        .unwrap();
    // Close and reopen the popover without deciding: served from cache.
    editor
        .open_suggestion("1", "amount", SuggestContext::default())
        .await
        .unwrap();
    backend.with_state(|state| assert_eq!(state.suggest_calls, 1));

    // Rejecting clears the cache.
    editor.reject_suggestion("1", "amount").unwrap();
    editor
        .open_suggestion("1", "amount", SuggestContext::default())
        .await
        .unwrap();
    backend.with_state(|state| assert_eq!(state.suggest_calls, 2));
}

#[tokio::test]
async fn empty_suggestion_accepts_as_empty_string() {
    let backend = FakeBackend::new(two_quarantined_rows());
    backend.with_state(|state| {
        state.suggest_response = SuggestFixResponse {
            suggestion: None,
            confidence: Confidence::Low,
            reasoning: "value cannot be recovered".to_string(),
        };
    });
    let mut editor = open_editor(&backend).await;

    editor
        .open_suggestion("1", "amount", SuggestContext::default())
        .await
        .unwrap();
    let committed = editor.accept_suggestion("1", "amount").unwrap();
    assert_eq!(committed, "");
    assert_eq!(editor.display_value("1", "amount", "1O0"), "");
}

#[tokio::test]
async fn suggestion_only_offered_for_quarantined_cells() {
    let backend = FakeBackend::new(vec![vec![
        row("1", "1O0", CellStatus::Quarantined),
        row("2", "200", CellStatus::Clean),
    ]]);
    let mut editor = open_editor(&backend).await;

    let err = editor
        .open_suggestion("2", "amount", SuggestContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EditorError::NotQuarantined { .. }));
    backend.with_state(|state| assert_eq!(state.suggest_calls, 0));
}

#[tokio::test]
async fn override_clears_only_when_accepted_value_arrives() {
    let backend = FakeBackend::new(two_quarantined_rows());
    let mut editor = open_editor(&backend).await;

    editor
        .open_suggestion("1", "amount", SuggestContext::default())
        .await
        .unwrap();
    editor.accept_suggestion("1", "amount").unwrap();
    editor.autosave_now().await.unwrap();
    assert!(!editor.is_cell_pending("1", "amount"));

    // The renderer is still showing the old value: the override holds.
    assert_eq!(editor.display_value("1", "amount", "1O0"), "Acme Corp");
    editor.observe_rendered("1", "amount", "1O0");
    assert_eq!(editor.display_value("1", "amount", "1O0"), "Acme Corp");

    // The accepted value finally arrives; the override retires.
    editor.observe_rendered("1", "amount", "Acme Corp");
    assert_eq!(
        editor.display_value("1", "amount", "Acme Corp"),
        "Acme Corp"
    );
}

#[tokio::test]
async fn reprocess_requires_successful_flush() {
    let backend = FakeBackend::new(two_quarantined_rows());
    let mut editor = open_editor(&backend).await;

    editor.commit_cell_edit("1", "amount", "100").unwrap();
    backend.with_state(|state| {
        state.fail_next_save = Some(ApiError::Network("connection reset".to_string()));
    });

    // The flush fails, so reprocessing must not be submitted and the editor
    // stays open with the edit intact.
    let err = editor.reprocess().await.unwrap_err();
    assert!(matches!(err, EditorError::Api(ApiError::Network(_))));
    backend.with_state(|state| assert_eq!(state.reprocess_calls, 0));
    assert_eq!(editor.pending_count(), 1);

    // With the transport recovered, reprocess flushes, submits, and closes.
    editor.reprocess().await.unwrap();
    backend.with_state(|state| assert_eq!(state.reprocess_calls, 1));
    assert!(matches!(
        editor.commit_cell_edit("2", "amount", "1"),
        Err(EditorError::Closed)
    ));
}

#[tokio::test]
async fn scroll_boundary_loads_each_page_once() {
    let backend = FakeBackend::new(vec![
        vec![row("1", "a", CellStatus::Quarantined)],
        vec![row("2", "b", CellStatus::Quarantined)],
    ]);
    let mut editor = open_editor(&backend).await;

    assert_eq!(editor.rows().len(), 1);
    assert!(editor.has_more_rows());

    editor.on_scroll_boundary().await.unwrap();
    assert_eq!(editor.rows().len(), 2);
    assert!(!editor.has_more_rows());

    // Rapid repeated boundary signals after exhaustion are no-ops.
    editor.on_scroll_boundary().await.unwrap();
    editor.on_scroll_boundary().await.unwrap();
    backend.with_state(|state| assert_eq!(state.page_calls, 1));
}

#[tokio::test]
async fn open_fails_distinctly_for_empty_files() {
    let backend = FakeBackend::new(vec![vec![]]);
    let err = QuarantineEditor::open(
        Arc::clone(&backend) as Arc<dyn QuarantineApi>,
        &config(),
        "f1",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::SessionOpen { .. }));
}

#[tokio::test]
async fn validation_rejected_before_any_network() {
    let backend = FakeBackend::new(two_quarantined_rows());
    let mut editor = open_editor(&backend).await;

    assert!(matches!(
        editor.commit_cell_edit("1", "row_id", "x"),
        Err(EditorError::NotEditable { .. })
    ));
    assert!(matches!(
        editor.commit_cell_edit("404", "amount", "x"),
        Err(EditorError::UnknownRow { .. })
    ));
    assert!(matches!(
        editor.preview_rule("amount", "   ").await,
        Err(EditorError::Rule(dqc_core::RuleError::EmptyDescription))
    ));
    backend.with_state(|state| {
        assert!(state.presented_etags.is_empty());
        assert_eq!(state.apply_calls, 0);
    });
}

#[tokio::test]
async fn queued_edits_drain_in_followup_batches() {
    let backend = FakeBackend::new(two_quarantined_rows());
    let mut editor = open_editor(&backend).await;

    editor.commit_cell_edit("1", "amount", "100").unwrap();
    editor.commit_cell_edit("2", "amount", "300").unwrap();
    let saved = editor.autosave_now().await.unwrap();
    assert_eq!(saved, 2);
    assert_eq!(editor.pending_count(), 0);

    // A second flush with nothing pending is a no-op: no extra etag spend.
    editor.autosave_now().await.unwrap();
    backend.with_state(|state| assert_eq!(state.presented_etags.len(), 1));
}

#[tokio::test]
async fn apply_all_refreshes_session_rows() {
    let backend = FakeBackend::new(two_quarantined_rows());
    backend.with_state(|state| state.apply_steps = vec![2]);
    let mut editor = open_editor(&backend).await;

    editor.preview_rule("amount", "strip letters").await.unwrap();
    // Simulate the bulk fix landing server-side before the refresh.
    backend.with_state(|state| {
        state.pages = vec![vec![
            row("1", "100", CellStatus::Edited),
            row("2", "200", CellStatus::Edited),
        ]];
    });
    editor.apply_rule_to_all("amount", "strip letters").await.unwrap();

    assert_eq!(editor.rows()[0].value("amount"), "100");
    assert!(editor.is_cell_saved("1", "amount"));
    assert!(!editor.is_cell_quarantined("1", "amount"));
}
