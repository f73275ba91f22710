//! HTTP implementation of the backend contract.
//!
//! JSON-over-HTTPS adapter for [`QuarantineApi`]. The adapter owns the
//! transport concerns only: request building, bearer auth, timeouts, and
//! the mapping from HTTP status codes to the engine's error taxonomy.
//! Session state (etag, rows, cursor) never lives here.
//!
//! Status mapping:
//!
//! | Status | Error |
//! |--------|-------|
//! | 401, 403 | [`ApiError::Permission`] |
//! | 404, 410, 422 on session open | [`ApiError::SessionOpen`] |
//! | 409, 412 | [`ApiError::ConcurrencyConflict`] |
//! | 429 | [`ApiError::RateLimited`] (honors `Retry-After`) |
//! | other non-2xx | [`ApiError::Api`] |

use async_trait::async_trait;
use bytes::Bytes;
use dqc_core::{PendingEdit, QuarantineRow};
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::{
    ApiError, ApplyRuleOutcome, ApplyRuleRequest, AutosaveOutcome, OpenSessionResponse,
    QuarantineApi, RowPage, RulePreviewRequest, RulePreviewResponse, SuggestFixRequest,
    SuggestFixResponse,
};
use crate::config::{ConfigError, ConsoleConfig};

/// Maximum length of an error body echoed into an error message.
const MAX_ERROR_BODY_LENGTH: usize = 512;

/// HTTP adapter for a DQ backend.
pub struct HttpQuarantineApi {
    config: ConsoleConfig,
    auth_token: Option<String>,
}

impl HttpQuarantineApi {
    /// Creates an adapter, resolving the bearer token from the configured
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the token
    /// variable is configured but unset.
    pub fn new(config: ConsoleConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let auth_token = config.resolve_token()?;
        Ok(Self { config, auth_token })
    }

    /// Creates an adapter with an explicitly injected token, bypassing
    /// environment resolution.
    #[must_use]
    pub fn with_token(config: ConsoleConfig, auth_token: Option<String>) -> Self {
        Self { config, auth_token }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Sends one JSON request and returns the status plus raw body.
    ///
    /// Transport failures and the endpoint-independent statuses (auth,
    /// throttling) are mapped here; everything else is left to the caller.
    async fn send(
        &self,
        method: &str,
        url: &str,
        body: Vec<u8>,
    ) -> Result<(StatusCode, Bytes), ApiError> {
        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build(https);

        let mut request = Request::builder()
            .method(method)
            .uri(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("User-Agent", "dqc-client/0.1");
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let request = request
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| ApiError::Network(e.to_string()))?;

        debug!(method, url, "sending backend request");

        let response = tokio::time::timeout(self.config.request_timeout(), client.request(request))
            .await
            .map_err(|_| ApiError::Network(format!("request timed out: {url}")))?
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Permission {
                message: format!("HTTP {status}"),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(ApiError::RateLimited { retry_after_secs });
        }

        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?
            .to_bytes();

        Ok((status, bytes))
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(StatusCode, Bytes), ApiError> {
        let encoded =
            serde_json::to_vec(body).map_err(|e| ApiError::Network(e.to_string()))?;
        self.send("POST", &self.endpoint(path), encoded).await
    }
}

/// Extracts a human-readable message from an error body.
fn error_message(bytes: &Bytes) -> String {
    #[derive(Deserialize)]
    struct WireError {
        message: String,
    }
    if let Ok(wire) = serde_json::from_slice::<WireError>(bytes) {
        return wire.message;
    }
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    text.truncate(MAX_ERROR_BODY_LENGTH);
    text
}

fn api_error(status: StatusCode, bytes: &Bytes) -> ApiError {
    if status == StatusCode::BAD_REQUEST {
        return ApiError::Validation(error_message(bytes));
    }
    ApiError::Api {
        status_code: status.as_u16(),
        message: error_message(bytes),
    }
}

fn conflict_error(status: StatusCode, bytes: &Bytes) -> Option<ApiError> {
    if status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED {
        warn!(status = status.as_u16(), "backend reported version conflict");
        Some(ApiError::ConcurrencyConflict {
            message: error_message(bytes),
        })
    } else {
        None
    }
}

fn parse_json<R: DeserializeOwned>(bytes: &Bytes) -> Result<R, ApiError> {
    serde_json::from_slice(bytes)
        .map_err(|e| ApiError::Network(format!("malformed response body: {e}")))
}

fn decode_rows(
    flat_rows: Vec<serde_json::Map<String, serde_json::Value>>,
) -> Result<Vec<QuarantineRow>, ApiError> {
    flat_rows
        .iter()
        .map(|flat| {
            QuarantineRow::from_flat(flat)
                .map_err(|e| ApiError::Network(format!("malformed row in response: {e}")))
        })
        .collect()
}

#[derive(Serialize)]
struct OpenSessionBody {
    page_size: u32,
}

#[derive(Deserialize)]
struct WireOpenSession {
    manifest: dqc_core::QuarantineManifest,
    session_id: String,
    etag: String,
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Serialize)]
struct FetchPageBody<'a> {
    cursor: &'a str,
    page_size: u32,
}

#[derive(Deserialize)]
struct WireRowPage {
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Serialize)]
struct AutosaveBody<'a> {
    if_match_etag: &'a str,
    edits: &'a [PendingEdit],
}

#[async_trait]
impl QuarantineApi for HttpQuarantineApi {
    async fn open_session(&self, file_id: &str) -> Result<OpenSessionResponse, ApiError> {
        let (status, bytes) = self
            .post_json(
                &format!("files/{file_id}/quarantine/session"),
                &OpenSessionBody {
                    page_size: self.config.page_size,
                },
            )
            .await?;

        if status == StatusCode::NOT_FOUND
            || status == StatusCode::GONE
            || status == StatusCode::UNPROCESSABLE_ENTITY
        {
            return Err(ApiError::SessionOpen {
                message: error_message(&bytes),
            });
        }
        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }

        let wire: WireOpenSession = parse_json(&bytes)?;
        wire.manifest
            .validate()
            .map_err(|e| ApiError::Network(format!("malformed manifest: {e}")))?;
        let rows = decode_rows(wire.rows)?;
        debug!(
            session_id = %wire.session_id,
            rows = rows.len(),
            quarantined = wire.manifest.row_count_quarantined,
            "quarantine session opened"
        );
        Ok(OpenSessionResponse {
            manifest: wire.manifest,
            session_id: wire.session_id,
            etag: wire.etag,
            rows,
            next_cursor: wire.next_cursor,
        })
    }

    async fn fetch_page(&self, session_id: &str, cursor: &str) -> Result<RowPage, ApiError> {
        let (status, bytes) = self
            .post_json(
                &format!("quarantine/sessions/{session_id}/rows"),
                &FetchPageBody {
                    cursor,
                    page_size: self.config.page_size,
                },
            )
            .await?;
        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        let wire: WireRowPage = parse_json(&bytes)?;
        Ok(RowPage {
            rows: decode_rows(wire.rows)?,
            next_cursor: wire.next_cursor,
        })
    }

    async fn autosave(
        &self,
        session_id: &str,
        etag: &str,
        edits: &[PendingEdit],
    ) -> Result<AutosaveOutcome, ApiError> {
        let (status, bytes) = self
            .post_json(
                &format!("quarantine/sessions/{session_id}/autosave"),
                &AutosaveBody {
                    if_match_etag: etag,
                    edits,
                },
            )
            .await?;
        if let Some(conflict) = conflict_error(status, &bytes) {
            return Err(conflict);
        }
        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        parse_json(&bytes)
    }

    async fn submit_reprocess(&self, file_id: &str) -> Result<(), ApiError> {
        let (status, bytes) = self
            .post_json(&format!("files/{file_id}/reprocess"), &serde_json::json!({}))
            .await?;
        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        debug!(file_id, "reprocess submitted");
        Ok(())
    }

    async fn suggest_fix(
        &self,
        request: &SuggestFixRequest,
    ) -> Result<SuggestFixResponse, ApiError> {
        let (status, bytes) = self.post_json("quarantine/suggest-fix", request).await?;
        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        parse_json(&bytes)
    }

    async fn preview_rule(
        &self,
        request: &RulePreviewRequest,
    ) -> Result<RulePreviewResponse, ApiError> {
        let (status, bytes) = self.post_json("quarantine/rules/preview", request).await?;
        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        parse_json(&bytes)
    }

    async fn apply_rule(&self, request: &ApplyRuleRequest) -> Result<ApplyRuleOutcome, ApiError> {
        let (status, bytes) = self.post_json("quarantine/rules/apply-all", request).await?;
        if let Some(conflict) = conflict_error(status, &bytes) {
            return Err(conflict);
        }
        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        parse_json(&bytes)
    }
}
