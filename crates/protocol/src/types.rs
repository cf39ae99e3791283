//! Core types shared across the protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a case sits in the processing pipeline.
///
/// Ordered by pipeline position so listings can sort on it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Received,
    Scanning,
    Extracting,
    Review,
    Approved,
    Rejected,
}

impl CaseStatus {
    /// Terminal statuses never move again
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseStatus::Approved | CaseStatus::Rejected)
    }
}

/// Document bundle category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseKind {
    Invoice,
    Contract,
    Claim,
    Statement,
}

/// Outcome of a single validation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleVerdict {
    Passed,
    Warning,
    Failed,
}

/// Final decision on a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionVerdict {
    Approved,
    Rejected,
    Escalated,
}

/// Quality-check report for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Quality score in 0.0..=1.0
    pub score: f32,
    pub issues: Vec<String>,
}

/// One uploaded document within a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub file_name: String,
    pub pages: u32,
    pub scan: Option<ScanReport>,
}

/// A committed manual edit, kept per field so replays can be detected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEditRecord {
    pub edit_id: String,
    pub value: Value,
    pub committed_at: String,
}

/// One extracted field on a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub id: String,
    pub label: String,
    pub value: Value,
    pub confidence: f32,
    #[serde(default)]
    pub manually_edited: bool,
    /// Extraction output as it was before the first manual edit.
    /// Set once; later edits never overwrite it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edits: Vec<FieldEditRecord>,
}

/// Result of one validation rule run against a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub name: String,
    pub verdict: RuleVerdict,
    pub detail: Option<String>,
}

/// The final decision recorded on a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: DecisionVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    pub decided_at: String,
}

/// Full case record as held in the client store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: String,
    pub title: String,
    pub kind: CaseKind,
    pub status: CaseStatus,
    pub documents: Vec<DocumentRef>,
    pub fields: Vec<ExtractedField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleOutcome>,
    pub decision: Option<Decision>,
    pub created_at: String,
    pub updated_at: String,
}

impl CaseRecord {
    pub fn field(&self, field_id: &str) -> Option<&ExtractedField> {
        self.fields.iter().find(|f| f.id == field_id)
    }

    pub fn field_mut(&mut self, field_id: &str) -> Option<&mut ExtractedField> {
        self.fields.iter_mut().find(|f| f.id == field_id)
    }

    pub fn document_mut(&mut self, document_id: &str) -> Option<&mut DocumentRef> {
        self.documents.iter_mut().find(|d| d.id == document_id)
    }
}

/// Changes to apply to a case record (delta updates).
///
/// Top-level fields merge shallowly: present fields replace, absent fields
/// are left alone. Nested collections are replaced whole, never merged
/// element by element. `decision` is doubly optional so a patch can clear
/// it with an explicit `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CasePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<CaseKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CaseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<DocumentRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<ExtractedField>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<RuleOutcome>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub decision: Option<Option<Decision>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Keeps an explicit `null` distinguishable from an absent field: stock
/// `Option` deserialization folds both into `None`, so a present field is
/// wrapped in the outer `Some` here and absence is handled by `default`.
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Committed field state returned by the write API after an accepted edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub edit_id: String,
    pub case_id: String,
    pub field_id: String,
    pub value: Value,
    pub committed_at: String,
}
