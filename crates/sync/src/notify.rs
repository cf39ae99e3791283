//! Domain events translated into user-facing alerts
//!
//! `alert_for` is the pure mapping; the bridge wires it to live topic
//! subscriptions and pushes alerts to whatever surface the embedder
//! provides (toast queue, terminal, test channel).

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use docket_protocol::server::{
    CaseCreated, DecisionMade, EditRejected, ExtractionCompleted, RulesCompleted, ScanCompleted,
};
use docket_protocol::{topics, DecisionVerdict, Envelope};

use crate::engine::SyncHandle;
use crate::error::EngineClosed;

/// How loud an alert should be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// A user-facing alert derived from one event
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub title: String,
    pub body: Option<String>,
    pub case_id: Option<String>,
}

impl Alert {
    fn new(severity: AlertSeverity, title: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            body: None,
            case_id: None,
        }
    }

    fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }
}

/// Map one envelope to at most one alert.
///
/// Pure and total: topics that never alert (progress ticks, routine store
/// updates, unknown topics) and payloads that fail to decode both yield
/// `None`.
pub fn alert_for(envelope: &Envelope) -> Option<Alert> {
    match envelope.topic.as_str() {
        topics::CASE_CREATED => {
            let ev: CaseCreated = decode(envelope)?;
            Some(
                Alert::new(AlertSeverity::Info, format!("New case: {}", ev.case.title))
                    .case(ev.case.id),
            )
        }
        topics::SCAN_COMPLETED => {
            let ev: ScanCompleted = decode(envelope)?;
            let alert = if ev.issues.is_empty() {
                Alert::new(AlertSeverity::Success, "Scan passed")
                    .body(format!("quality {:.0}%", ev.score * 100.0))
            } else {
                Alert::new(
                    AlertSeverity::Warning,
                    format!(
                        "Scan flagged {} issue{}",
                        ev.issues.len(),
                        if ev.issues.len() == 1 { "" } else { "s" }
                    ),
                )
                .body(ev.issues.join(", "))
            };
            Some(alert.case(ev.case_id))
        }
        topics::EXTRACTION_COMPLETED => {
            let ev: ExtractionCompleted = decode(envelope)?;
            Some(
                Alert::new(AlertSeverity::Success, "Extraction complete")
                    .body(format!("{} fields extracted", ev.field_count))
                    .case(ev.case_id),
            )
        }
        topics::RULES_COMPLETED => {
            let ev: RulesCompleted = decode(envelope)?;
            // Worst outcome wins: any failure beats any warning beats all-green
            let (severity, title) = if ev.failed > 0 {
                (AlertSeverity::Error, "Validation failed")
            } else if ev.warnings > 0 {
                (AlertSeverity::Warning, "Validation passed with warnings")
            } else {
                (AlertSeverity::Success, "All rules passed")
            };
            Some(
                Alert::new(severity, title)
                    .body(format!(
                        "{} passed, {} warnings, {} failed",
                        ev.passed, ev.warnings, ev.failed
                    ))
                    .case(ev.case_id),
            )
        }
        topics::DECISION_MADE => {
            let ev: DecisionMade = decode(envelope)?;
            let (severity, title) = match ev.verdict {
                DecisionVerdict::Approved => (AlertSeverity::Success, "Case approved"),
                DecisionVerdict::Rejected => (AlertSeverity::Warning, "Case rejected"),
                DecisionVerdict::Escalated => (AlertSeverity::Info, "Case escalated"),
            };
            let mut alert = Alert::new(severity, title).case(ev.case_id);
            if let Some(reason) = ev.reason {
                alert = alert.body(reason);
            }
            Some(alert)
        }
        topics::EDIT_REJECTED => {
            let ev: EditRejected = decode(envelope)?;
            Some(
                Alert::new(AlertSeverity::Error, "Edit rejected")
                    .body(ev.reason)
                    .case(ev.case_id),
            )
        }
        _ => None,
    }
}

fn decode<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Option<T> {
    match serde_json::from_value(envelope.payload.clone()) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            debug!(
                component = "notify",
                event = "alert.payload_undecodable",
                topic = %envelope.topic,
                error = %e,
                "Alert payload failed to decode; no alert"
            );
            None
        }
    }
}

/// Listens on the alert-bearing topics and forwards alerts until torn down.
///
/// Built per engine; there is no process-global notifier. After
/// [`shutdown`](Self::shutdown) returns, no further alerts are produced.
pub struct NotificationBridge {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl NotificationBridge {
    /// Topics the bridge listens on
    pub const TOPICS: &'static [&'static str] = &[
        topics::CASE_CREATED,
        topics::SCAN_COMPLETED,
        topics::EXTRACTION_COMPLETED,
        topics::RULES_COMPLETED,
        topics::DECISION_MADE,
        topics::EDIT_REJECTED,
    ];

    pub async fn spawn(
        handle: &SyncHandle,
        alerts: mpsc::Sender<Alert>,
    ) -> Result<Self, EngineClosed> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut ids = Vec::with_capacity(Self::TOPICS.len());
        for topic in Self::TOPICS {
            ids.push(handle.subscribe_with(topic, event_tx.clone()).await?);
        }
        drop(event_tx);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let engine = handle.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    maybe = event_rx.recv() => match maybe {
                        Some(envelope) => {
                            if let Some(alert) = alert_for(&envelope) {
                                if alerts.send(alert).await.is_err() {
                                    break;
                                }
                            }
                        }
                        None => break,
                    }
                }
            }
            for id in ids {
                engine.unregister(id);
            }
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// Tear the bridge down and wait for its task to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(topic: &str, payload: serde_json::Value) -> Envelope {
        Envelope::new(topic, payload)
    }

    #[test]
    fn clean_scan_is_a_success() {
        let alert = alert_for(&envelope(
            topics::SCAN_COMPLETED,
            json!({"case_id":"c-1","document_id":"d-1","score":0.95,"issues":[]}),
        ))
        .expect("alert");
        assert_eq!(alert.severity, AlertSeverity::Success);
        assert_eq!(alert.case_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn scan_with_issues_warns_and_lists_them() {
        let alert = alert_for(&envelope(
            topics::SCAN_COMPLETED,
            json!({"case_id":"c-1","document_id":"d-1","score":0.4,"issues":["skew","low contrast"]}),
        ))
        .expect("alert");
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert_eq!(alert.title, "Scan flagged 2 issues");
        assert_eq!(alert.body.as_deref(), Some("skew, low contrast"));
    }

    #[test]
    fn rules_severity_takes_the_worst_outcome() {
        let failed = alert_for(&envelope(
            topics::RULES_COMPLETED,
            json!({"case_id":"c-1","passed":7,"warnings":2,"failed":1}),
        ))
        .expect("alert");
        assert_eq!(failed.severity, AlertSeverity::Error);

        let warned = alert_for(&envelope(
            topics::RULES_COMPLETED,
            json!({"case_id":"c-1","passed":9,"warnings":1,"failed":0}),
        ))
        .expect("alert");
        assert_eq!(warned.severity, AlertSeverity::Warning);

        let clean = alert_for(&envelope(
            topics::RULES_COMPLETED,
            json!({"case_id":"c-1","passed":10,"warnings":0,"failed":0}),
        ))
        .expect("alert");
        assert_eq!(clean.severity, AlertSeverity::Success);
    }

    #[test]
    fn decision_severity_follows_verdict() {
        let approved = alert_for(&envelope(
            topics::DECISION_MADE,
            json!({"case_id":"c-1","verdict":"approved"}),
        ))
        .expect("alert");
        assert_eq!(approved.severity, AlertSeverity::Success);

        let rejected = alert_for(&envelope(
            topics::DECISION_MADE,
            json!({"case_id":"c-1","verdict":"rejected","reason":"totals disagree"}),
        ))
        .expect("alert");
        assert_eq!(rejected.severity, AlertSeverity::Warning);
        assert_eq!(rejected.body.as_deref(), Some("totals disagree"));

        let escalated = alert_for(&envelope(
            topics::DECISION_MADE,
            json!({"case_id":"c-1","verdict":"escalated"}),
        ))
        .expect("alert");
        assert_eq!(escalated.severity, AlertSeverity::Info);
    }

    #[test]
    fn edit_rejection_is_an_error_alert() {
        let alert = alert_for(&envelope(
            topics::EDIT_REJECTED,
            json!({"case_id":"c-1","field_id":"amount","reason":"value out of range"}),
        ))
        .expect("alert");
        assert_eq!(alert.severity, AlertSeverity::Error);
        assert_eq!(alert.body.as_deref(), Some("value out of range"));
    }

    #[test]
    fn progress_and_routine_updates_never_alert() {
        assert!(alert_for(&envelope(
            topics::EXTRACTION_PROGRESS,
            json!({"case_id":"c-1","completed":5,"total":10}),
        ))
        .is_none());

        assert!(alert_for(&envelope(
            topics::CASE_UPDATED,
            json!({"case_id":"c-1","patch":{}}),
        ))
        .is_none());

        assert!(alert_for(&envelope("weather.changed", json!({}))).is_none());
    }

    #[test]
    fn undecodable_payload_yields_no_alert() {
        assert!(alert_for(&envelope(topics::RULES_COMPLETED, json!("nope"))).is_none());
    }
}
