//! Optimistic field edits: speculative apply, then commit or compensate
//!
//! The ledger tracks at most one in-flight edit per field. The engine
//! applies the new value to the store immediately, parks the undo record
//! and the caller's reply here, and resolves the entry when the remote
//! write comes back. Every begun edit ends in exactly one of commit or
//! rollback; nothing is left dangling.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use docket_protocol::FieldSnapshot;

use crate::error::EditError;
use crate::store::FieldUndo;

/// Key identifying one editable field
pub(crate) type FieldKey = (String, String);

/// What the caller of `save_field_edit` gets back on commit
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    pub edit_id: String,
    pub case_id: String,
    pub field_id: String,
    /// Committed value as canonicalized by the server
    pub value: Value,
}

/// What the remote write produced for an in-flight edit
#[derive(Debug)]
pub(crate) enum WriteOutcome {
    Committed(FieldSnapshot),
    Rejected { reason: String },
}

/// One in-flight edit awaiting its remote result
pub(crate) struct PendingEdit {
    pub undo: FieldUndo,
    pub reply: Option<oneshot::Sender<Result<EditOutcome, EditError>>>,
}

/// Bookkeeping for all in-flight edits
#[derive(Default)]
pub(crate) struct EditLedger {
    in_flight: HashMap<FieldKey, PendingEdit>,
}

impl EditLedger {
    pub fn is_in_flight(&self, key: &FieldKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Park an edit until its write resolves. Fails when the field
    /// already has an edit in flight.
    pub fn begin(&mut self, key: FieldKey, edit: PendingEdit) -> Result<(), EditError> {
        if self.in_flight.contains_key(&key) {
            return Err(EditError::EditInFlight { field_id: key.1 });
        }
        self.in_flight.insert(key, edit);
        Ok(())
    }

    /// Take the pending edit out for resolution. Returns `None` if the
    /// key was never begun or already resolved.
    pub fn resolve(&mut self, key: &FieldKey) -> Option<PendingEdit> {
        self.in_flight.remove(key)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }
}
