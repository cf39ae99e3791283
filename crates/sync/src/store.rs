//! Normalized case store and derived listings
//!
//! The engine actor owns the mutable map; readers get immutable snapshots
//! through `ArcSwap`, republished after every mutation. Patches merge
//! shallowly at the top level and replace nested sections whole.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use docket_protocol::{
    parse_wire_ts, wire_now, CaseKind, CasePatch, CaseRecord, CaseStatus, Decision,
    FieldEditRecord, FieldSnapshot, ScanReport,
};
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;

/// Immutable view of the store, published after every mutation
#[derive(Debug, Default)]
pub struct StoreSnapshot {
    pub cases: HashMap<String, CaseRecord>,
    pub revision: u64,
}

/// Sort key for derived case listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseSortField {
    Title,
    Status,
    Kind,
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Filter and sort settings for a derived case listing.
///
/// Empty filter sets mean "no restriction". The search needle matches
/// case-insensitively against title and ID.
#[derive(Debug, Clone)]
pub struct CaseQuery {
    pub statuses: Vec<CaseStatus>,
    pub kinds: Vec<CaseKind>,
    pub search: Option<String>,
    pub sort_field: CaseSortField,
    pub sort_direction: SortDirection,
}

impl Default for CaseQuery {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            kinds: Vec::new(),
            search: None,
            sort_field: CaseSortField::UpdatedAt,
            sort_direction: SortDirection::Descending,
        }
    }
}

impl StoreSnapshot {
    /// Filtered, sorted case listing.
    ///
    /// The sort is total: ties on the sort key fall back to the case ID,
    /// so equal keys never flip order between recomputations.
    pub fn query(&self, query: &CaseQuery) -> Vec<&CaseRecord> {
        let needle = query.search.as_deref().map(str::to_lowercase);
        let mut matches: Vec<&CaseRecord> = self
            .cases
            .values()
            .filter(|case| {
                (query.statuses.is_empty() || query.statuses.contains(&case.status))
                    && (query.kinds.is_empty() || query.kinds.contains(&case.kind))
                    && needle.as_ref().is_none_or(|n| {
                        case.title.to_lowercase().contains(n) || case.id.to_lowercase().contains(n)
                    })
            })
            .collect();

        matches.sort_by(|a, b| {
            let ordering = compare_cases(a, b, query.sort_field)
                .then_with(|| a.id.cmp(&b.id));
            match query.sort_direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
        matches
    }

    pub fn get(&self, case_id: &str) -> Option<&CaseRecord> {
        self.cases.get(case_id)
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

fn compare_cases(a: &CaseRecord, b: &CaseRecord, field: CaseSortField) -> Ordering {
    match field {
        CaseSortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        CaseSortField::Status => a.status.cmp(&b.status),
        CaseSortField::Kind => a.kind.cmp(&b.kind),
        CaseSortField::CreatedAt => wire_ts_key(&a.created_at).cmp(&wire_ts_key(&b.created_at)),
        CaseSortField::UpdatedAt => wire_ts_key(&a.updated_at).cmp(&wire_ts_key(&b.updated_at)),
    }
}

// Timestamps sort numerically; unparsable ones sink to the epoch.
fn wire_ts_key(value: &str) -> u64 {
    parse_wire_ts(value).unwrap_or(0)
}

/// Undo record captured before a speculative field mutation. Restoring it
/// returns value, edited flag, and original-value bookkeeping together.
#[derive(Debug, Clone)]
pub struct FieldUndo {
    pub value: Value,
    pub manually_edited: bool,
    pub original_value: Option<Value>,
}

/// Mutable case map owned by the engine actor
pub(crate) struct CaseStore {
    cases: HashMap<String, CaseRecord>,
    revision: u64,
    snapshot: Arc<ArcSwap<StoreSnapshot>>,
}

impl CaseStore {
    pub fn new() -> Self {
        Self {
            cases: HashMap::new(),
            revision: 0,
            snapshot: Arc::new(ArcSwap::from_pointee(StoreSnapshot::default())),
        }
    }

    /// Shared snapshot cell for lock-free reads from handles
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<StoreSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    fn publish(&mut self) {
        self.revision += 1;
        self.snapshot.store(Arc::new(StoreSnapshot {
            cases: self.cases.clone(),
            revision: self.revision,
        }));
    }

    pub fn get(&self, case_id: &str) -> Option<&CaseRecord> {
        self.cases.get(case_id)
    }

    pub fn contains(&self, case_id: &str) -> bool {
        self.cases.contains_key(case_id)
    }

    /// Replace the whole collection (initial load, reconnect reconciliation)
    pub fn set_all(&mut self, records: Vec<CaseRecord>) {
        self.cases = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.publish();
    }

    /// Insert or replace one full record
    pub fn insert(&mut self, record: CaseRecord) {
        self.cases.insert(record.id.clone(), record);
        self.publish();
    }

    pub fn remove(&mut self, case_id: &str) -> bool {
        let removed = self.cases.remove(case_id).is_some();
        if removed {
            self.publish();
        }
        removed
    }

    /// Merge a patch into an existing case. Patching an unknown case is an
    /// error; push handlers decide whether that is worth more than a log.
    pub fn upsert(&mut self, case_id: &str, patch: CasePatch) -> Result<(), StoreError> {
        let case = self.cases.get_mut(case_id).ok_or_else(|| {
            StoreError::CaseNotFound {
                case_id: case_id.to_string(),
            }
        })?;
        apply_patch(case, patch);
        self.publish();
        Ok(())
    }

    /// Attach a finished quality-check report to one document
    pub fn attach_scan_report(
        &mut self,
        case_id: &str,
        document_id: &str,
        report: ScanReport,
    ) -> bool {
        let Some(case) = self.cases.get_mut(case_id) else {
            return false;
        };
        let Some(document) = case.document_mut(document_id) else {
            debug!(
                component = "store",
                event = "scan.unknown_document",
                case_id,
                document_id,
                "Scan report for a document the store does not hold"
            );
            return false;
        };
        document.scan = Some(report);
        case.updated_at = wire_now();
        self.publish();
        true
    }

    /// Record the final decision and move the case to its terminal status
    pub fn record_decision(&mut self, case_id: &str, decision: Decision, status: CaseStatus) -> bool {
        let Some(case) = self.cases.get_mut(case_id) else {
            return false;
        };
        case.decision = Some(decision);
        case.status = status;
        case.updated_at = wire_now();
        self.publish();
        true
    }

    /// Speculatively apply a manual field edit, returning the undo record.
    ///
    /// Sets the edited flag and captures `original_value` on the first
    /// edit only; later edits keep the original extraction output.
    pub fn apply_field_edit(
        &mut self,
        case_id: &str,
        field_id: &str,
        value: Value,
    ) -> Result<FieldUndo, StoreError> {
        let case = self.cases.get_mut(case_id).ok_or_else(|| {
            StoreError::CaseNotFound {
                case_id: case_id.to_string(),
            }
        })?;
        let field = case.field_mut(field_id).ok_or_else(|| {
            StoreError::FieldNotFound {
                case_id: case_id.to_string(),
                field_id: field_id.to_string(),
            }
        })?;

        let undo = FieldUndo {
            value: field.value.clone(),
            manually_edited: field.manually_edited,
            original_value: field.original_value.clone(),
        };

        if field.original_value.is_none() {
            field.original_value = Some(field.value.clone());
        }
        field.value = value;
        field.manually_edited = true;
        case.updated_at = wire_now();
        self.publish();
        Ok(undo)
    }

    /// Restore a field to its pre-edit state. A case or field that
    /// disappeared while the edit was in flight makes this a no-op.
    pub fn rollback_field_edit(&mut self, case_id: &str, field_id: &str, undo: FieldUndo) -> bool {
        let Some(case) = self.cases.get_mut(case_id) else {
            debug!(
                component = "store",
                event = "edit.rollback_skipped",
                case_id,
                field_id,
                "Rollback target case is gone; nothing to restore"
            );
            return false;
        };
        let Some(field) = case.field_mut(field_id) else {
            debug!(
                component = "store",
                event = "edit.rollback_skipped",
                case_id,
                field_id,
                "Rollback target field is gone; nothing to restore"
            );
            return false;
        };

        field.value = undo.value;
        field.manually_edited = undo.manually_edited;
        field.original_value = undo.original_value;
        case.updated_at = wire_now();
        self.publish();
        true
    }

    /// Apply a committed edit snapshot. Replays of an already-recorded
    /// edit ID change nothing. Returns whether the store changed.
    pub fn apply_committed_edit(&mut self, snapshot: &FieldSnapshot) -> bool {
        let Some(case) = self.cases.get_mut(&snapshot.case_id) else {
            return false;
        };
        let Some(field) = case.field_mut(&snapshot.field_id) else {
            return false;
        };
        if field.edits.iter().any(|e| e.edit_id == snapshot.edit_id) {
            debug!(
                component = "store",
                event = "edit.commit_replayed",
                case_id = %snapshot.case_id,
                field_id = %snapshot.field_id,
                edit_id = %snapshot.edit_id,
                "Commit already recorded; ignoring replay"
            );
            return false;
        }

        field.value = snapshot.value.clone();
        field.edits.push(FieldEditRecord {
            edit_id: snapshot.edit_id.clone(),
            value: snapshot.value.clone(),
            committed_at: snapshot.committed_at.clone(),
        });
        case.updated_at = wire_now();
        self.publish();
        true
    }
}

fn apply_patch(case: &mut CaseRecord, patch: CasePatch) {
    if let Some(title) = patch.title {
        case.title = title;
    }
    if let Some(kind) = patch.kind {
        case.kind = kind;
    }
    if let Some(status) = patch.status {
        case.status = status;
    }
    if let Some(documents) = patch.documents {
        case.documents = documents;
    }
    if let Some(fields) = patch.fields {
        case.fields = fields;
    }
    if let Some(rules) = patch.rules {
        case.rules = rules;
    }
    if let Some(decision) = patch.decision {
        case.decision = decision;
    }
    match patch.updated_at {
        Some(ts) => case.updated_at = ts,
        None => case.updated_at = wire_now(),
    }
}
