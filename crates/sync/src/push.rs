//! Applying server pushes to the case store
//!
//! One synchronous function per inbound envelope: decode the payload for
//! the topic, mutate the store, report what happened. No IO, no async,
//! fully unit-testable. A payload that fails to decode for a known topic
//! marks the whole frame malformed; the engine then drops it without
//! dispatching to consumers.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use docket_protocol::server::{
    CaseCreated, CaseDeleted, CaseUpdated, DecisionMade, ExtractionCompleted, ExtractionProgress,
    RulesCompleted, ScanCompleted,
};
use docket_protocol::{topics, CaseStatus, Decision, DecisionVerdict, ScanReport};

use crate::store::CaseStore;

/// What one push did to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PushEffect {
    Applied,
    /// Known topic, but the store held no matching case
    NoMatch,
    /// Not a store-affecting topic; dispatch only
    Unhandled,
    /// Known topic with an undecodable payload; drop the frame
    Malformed,
}

pub(crate) fn apply_push(store: &mut CaseStore, topic: &str, payload: &Value) -> PushEffect {
    match topic {
        topics::CASE_CREATED => decode(topic, payload, |ev: CaseCreated| {
            store.insert(ev.case);
            PushEffect::Applied
        }),
        topics::CASE_UPDATED => decode(topic, payload, |ev: CaseUpdated| {
            match store.upsert(&ev.case_id, ev.patch) {
                Ok(()) => PushEffect::Applied,
                Err(_) => {
                    debug!(
                        component = "push",
                        event = "case.update_unknown",
                        case_id = %ev.case_id,
                        "Update for a case the store does not hold; skipping"
                    );
                    PushEffect::NoMatch
                }
            }
        }),
        topics::CASE_DELETED => decode(topic, payload, |ev: CaseDeleted| {
            if store.remove(&ev.case_id) {
                PushEffect::Applied
            } else {
                PushEffect::NoMatch
            }
        }),
        topics::SCAN_COMPLETED => decode(topic, payload, |ev: ScanCompleted| {
            let attached = store.attach_scan_report(
                &ev.case_id,
                &ev.document_id,
                ScanReport {
                    score: ev.score,
                    issues: ev.issues,
                },
            );
            if attached {
                PushEffect::Applied
            } else {
                PushEffect::NoMatch
            }
        }),
        topics::DECISION_MADE => decode(topic, payload, |ev: DecisionMade| {
            let status = match ev.verdict {
                DecisionVerdict::Approved => CaseStatus::Approved,
                DecisionVerdict::Rejected => CaseStatus::Rejected,
                DecisionVerdict::Escalated => CaseStatus::Review,
            };
            let decision = Decision {
                verdict: ev.verdict,
                reason: ev.reason,
                decided_by: ev.decided_by,
                decided_at: docket_protocol::wire_now(),
            };
            if store.record_decision(&ev.case_id, decision, status) {
                PushEffect::Applied
            } else {
                PushEffect::NoMatch
            }
        }),
        topics::EXTRACTION_PROGRESS => decode(topic, payload, |ev: ExtractionProgress| {
            // Progress is console-level detail only; the store keeps no
            // per-tick state.
            debug!(
                component = "push",
                event = "extraction.progress",
                case_id = %ev.case_id,
                completed = ev.completed,
                total = ev.total,
                "Extraction progress tick"
            );
            PushEffect::Unhandled
        }),
        // Completion markers carry no store state (field and rule data arrive
        // through case.updated patches), but their payloads are still checked
        // so a malformed frame never reaches subscribers.
        topics::EXTRACTION_COMPLETED => {
            decode(topic, payload, |_: ExtractionCompleted| PushEffect::Unhandled)
        }
        topics::RULES_COMPLETED => {
            decode(topic, payload, |_: RulesCompleted| PushEffect::Unhandled)
        }
        // Unknown topics flow through to subscribers untyped.
        _ => PushEffect::Unhandled,
    }
}

fn decode<T, F>(topic: &str, payload: &Value, apply: F) -> PushEffect
where
    T: DeserializeOwned,
    F: FnOnce(T) -> PushEffect,
{
    match serde_json::from_value::<T>(payload.clone()) {
        Ok(decoded) => apply(decoded),
        Err(e) => {
            warn!(
                component = "push",
                event = "push.payload_malformed",
                topic,
                error = %e,
                "Failed to decode push payload; dropping frame"
            );
            PushEffect::Malformed
        }
    }
}
