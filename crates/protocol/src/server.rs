//! Server → Client wire traffic: event envelopes and typed payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::*;
use crate::{new_id, wire_now};

/// One unit of wire traffic pushed by the server.
///
/// The payload stays opaque at this level; consumers that care about a
/// topic decode it into the matching payload type below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub topic: String,
    pub payload: Value,
    pub timestamp: String,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            id: new_id(),
            topic: topic.into(),
            payload,
            timestamp: wire_now(),
        }
    }
}

/// Topic names used on the wire.
///
/// Global topics are fixed strings. Case-scoped topics are derived from the
/// case ID with [`case_scope`]; the `case:` prefix keeps them out of the
/// global `case.*` namespace.
pub mod topics {
    pub const CASE_CREATED: &str = "case.created";
    pub const CASE_UPDATED: &str = "case.updated";
    pub const CASE_DELETED: &str = "case.deleted";
    pub const SCAN_COMPLETED: &str = "scan.completed";
    pub const EXTRACTION_PROGRESS: &str = "extraction.progress";
    pub const EXTRACTION_COMPLETED: &str = "extraction.completed";
    pub const RULES_COMPLETED: &str = "rules.completed";
    pub const DECISION_MADE: &str = "decision.made";

    // Emitted locally by the sync engine when an optimistic edit resolves;
    // the server never sends these.
    pub const EDIT_COMMITTED: &str = "edit.committed";
    pub const EDIT_REJECTED: &str = "edit.rejected";

    const CASE_SCOPE_PREFIX: &str = "case:";

    /// Topic carrying events scoped to one case
    pub fn case_scope(case_id: &str) -> String {
        format!("{}{}", CASE_SCOPE_PREFIX, case_id)
    }

    /// Extract the case ID from a case-scoped topic
    pub fn parse_case_scope(topic: &str) -> Option<&str> {
        topic.strip_prefix(CASE_SCOPE_PREFIX)
    }
}

/// Payload for `case.created`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseCreated {
    pub case: CaseRecord,
}

/// Payload for `case.updated`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseUpdated {
    pub case_id: String,
    pub patch: CasePatch,
}

/// Payload for `case.deleted`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDeleted {
    pub case_id: String,
}

/// Payload for `scan.completed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanCompleted {
    pub case_id: String,
    pub document_id: String,
    pub score: f32,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Payload for `extraction.progress`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionProgress {
    pub case_id: String,
    pub completed: u32,
    pub total: u32,
}

/// Payload for `extraction.completed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionCompleted {
    pub case_id: String,
    pub field_count: u32,
}

/// Payload for `rules.completed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesCompleted {
    pub case_id: String,
    pub passed: u32,
    pub warnings: u32,
    pub failed: u32,
}

/// Payload for `decision.made`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionMade {
    pub case_id: String,
    pub verdict: DecisionVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
}

/// Payload for the locally emitted `edit.committed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditCommitted {
    pub case_id: String,
    pub field_id: String,
    pub edit_id: String,
    pub value: Value,
}

/// Payload for the locally emitted `edit.rejected`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditRejected {
    pub case_id: String,
    pub field_id: String,
    pub reason: String,
}
