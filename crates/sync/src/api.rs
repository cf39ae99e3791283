//! External collaborators: the server's REST surface
//!
//! The engine only sees these two traits; tests plug in stubs, production
//! wires `HttpCaseApi` against the docket server.

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};

use docket_protocol::{CaseRecord, FieldSnapshot};

use crate::error::ApiError;

/// Read side: fetch authoritative case records
pub trait CaseReadApi: Send + Sync {
    fn fetch_case<'a>(&'a self, case_id: &'a str) -> BoxFuture<'a, Result<CaseRecord, ApiError>>;
}

/// Write side: submit a manual field edit, receiving the committed snapshot
pub trait FieldWriteApi: Send + Sync {
    fn submit_field_update<'a>(
        &'a self,
        case_id: &'a str,
        field_id: &'a str,
        value: Value,
    ) -> BoxFuture<'a, Result<FieldSnapshot, ApiError>>;
}

/// HTTP implementation of both collaborator traits
pub struct HttpCaseApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCaseApi {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:4000`
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

impl CaseReadApi for HttpCaseApi {
    fn fetch_case<'a>(&'a self, case_id: &'a str) -> BoxFuture<'a, Result<CaseRecord, ApiError>> {
        Box::pin(async move {
            let url = format!("{}/api/cases/{}", self.base_url, case_id);
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| ApiError::Request(e.to_string()))?;

            let status = resp.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(ApiError::NotFound(case_id.to_string()));
            }
            if !status.is_success() {
                return Err(ApiError::Rejected {
                    reason: error_reason(resp).await,
                });
            }
            resp.json::<CaseRecord>()
                .await
                .map_err(|e| ApiError::Request(e.to_string()))
        })
    }
}

impl FieldWriteApi for HttpCaseApi {
    fn submit_field_update<'a>(
        &'a self,
        case_id: &'a str,
        field_id: &'a str,
        value: Value,
    ) -> BoxFuture<'a, Result<FieldSnapshot, ApiError>> {
        Box::pin(async move {
            let url = format!(
                "{}/api/cases/{}/fields/{}",
                self.base_url, case_id, field_id
            );
            let resp = self
                .client
                .put(&url)
                .json(&json!({ "value": value }))
                .send()
                .await
                .map_err(|e| ApiError::Request(e.to_string()))?;

            let status = resp.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(ApiError::NotFound(case_id.to_string()));
            }
            if !status.is_success() {
                return Err(ApiError::Rejected {
                    reason: error_reason(resp).await,
                });
            }
            resp.json::<FieldSnapshot>()
                .await
                .map_err(|e| ApiError::Request(e.to_string()))
        })
    }
}

/// Best-effort extraction of the server's error message from a failed
/// response body, falling back to the status line.
async fn error_reason(resp: reqwest::Response) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        message: Option<String>,
    }

    let status = resp.status();
    if let Ok(body) = resp.json::<ErrorBody>().await {
        if let Some(reason) = body.error.or(body.message) {
            return reason;
        }
    }
    status.to_string()
}
