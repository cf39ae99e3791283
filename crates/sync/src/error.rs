//! Error taxonomy for the sync engine

use thiserror::Error;

/// Transport-level failures.
///
/// Transient connection loss is handled inside the transport task by
/// reconnecting; it never surfaces as an error. These variants only come
/// out of explicit calls such as `publish`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport is shut down")]
    Closed,
}

/// Failures surfaced by `save_field_edit`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("case {case_id} not found")]
    CaseNotFound { case_id: String },
    #[error("field {field_id} not found on case {case_id}")]
    FieldNotFound { case_id: String, field_id: String },
    #[error("an edit for field {field_id} is already in flight")]
    EditInFlight { field_id: String },
    #[error("edit rejected: {reason}")]
    Rejected { reason: String },
    #[error("sync engine is shut down")]
    EngineClosed,
}

/// Failures from the external case read/write APIs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("case {0} not found")]
    NotFound(String),
    #[error("rejected by server: {reason}")]
    Rejected { reason: String },
}

/// Failures applying data to the in-memory store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("case {case_id} not found")]
    CaseNotFound { case_id: String },
    #[error("field {field_id} not found on case {case_id}")]
    FieldNotFound { case_id: String, field_id: String },
}

/// Configuration rejected at engine startup
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid endpoint URL `{url}`: {source}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// The engine actor is gone; no further calls will succeed
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("sync engine is shut down")]
pub struct EngineClosed;
