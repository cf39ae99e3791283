//! End-to-end tests for the sync engine against an in-process server.
//!
//! These drive the real WebSocket transport and REST client: interest
//! replay across reconnects, wire-command coalescing, malformed-frame
//! handling, and the optimistic edit path over HTTP.

mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use docket_protocol::server::CaseCreated;
use docket_protocol::{topics, CaseRecord, ClientCommand, Envelope};
use docket_sync::{
    AlertSeverity, BackoffConfig, CaseReadApi, ConnectionStatus, EditError, FieldWriteApi,
    HttpCaseApi, NotificationBridge, SyncConfig, SyncEngine, SyncHandle,
};

use support::TestHub;

const CMD_WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

fn hub_config(hub: &TestHub) -> SyncConfig {
    SyncConfig {
        endpoint: hub.ws_url(),
        backoff: BackoffConfig {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            max_jitter_frac: 0.0,
        },
        ping_interval: Duration::from_secs(20),
    }
}

fn spawn_against(hub: &TestHub) -> SyncHandle {
    let api = Arc::new(HttpCaseApi::new(hub.api_url()));
    let read: Arc<dyn CaseReadApi> = api.clone();
    let write: Arc<dyn FieldWriteApi> = api;
    SyncEngine::spawn(hub_config(hub), read, write).expect("spawn engine")
}

async fn wait_connected(handle: &SyncHandle) {
    let mut rx = handle.connection();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_connected()))
        .await
        .expect("timed out waiting for connection")
        .expect("engine stopped while connecting");
}

async fn wait_for_case(handle: &SyncHandle, case_id: &str, check: impl Fn(&CaseRecord) -> bool) {
    for _ in 0..200 {
        if handle.case(case_id).as_ref().is_some_and(&check) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("case {case_id} never reached the expected state");
}

#[tokio::test]
async fn interest_declared_offline_is_subscribed_on_connect() {
    let mut hub = TestHub::start().await;
    let handle = spawn_against(&hub);

    handle.subscribe_to_case("c-1");
    let mut created = handle.subscribe(topics::CASE_CREATED).await.unwrap();

    handle.connect();
    wait_connected(&handle).await;
    assert_eq!(
        hub.next_command(CMD_WAIT).await,
        Some(ClientCommand::subscribe_case("c-1"))
    );

    let case = support::invoice_case("c-1", 3500);
    hub.push(&Envelope::new(
        topics::CASE_CREATED,
        serde_json::to_value(CaseCreated { case: case.clone() }).unwrap(),
    ));

    let envelope = tokio::time::timeout(Duration::from_secs(2), created.recv())
        .await
        .expect("timed out waiting for push")
        .expect("subscription closed");
    assert_eq!(envelope.topic, topics::CASE_CREATED);
    wait_for_case(&handle, "c-1", |c| c.title == case.title).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn case_interest_coalesces_wire_commands() {
    let mut hub = TestHub::start().await;
    let handle = spawn_against(&hub);
    handle.connect();
    wait_connected(&handle).await;

    // Two independent consumers, one wire subscription
    handle.subscribe_to_case("c-3");
    handle.subscribe_to_case("c-3");
    assert_eq!(
        hub.next_command(CMD_WAIT).await,
        Some(ClientCommand::subscribe_case("c-3"))
    );
    assert_eq!(hub.next_command(QUIET).await, None);

    // First release keeps the channel open; the last one closes it
    handle.unsubscribe_from_case("c-3");
    assert_eq!(hub.next_command(QUIET).await, None);
    handle.unsubscribe_from_case("c-3");
    assert_eq!(
        hub.next_command(CMD_WAIT).await,
        Some(ClientCommand::unsubscribe_case("c-3"))
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_never_reach_consumers() {
    let mut hub = TestHub::start().await;
    let handle = spawn_against(&hub);
    let mut updates = handle.subscribe(topics::CASE_UPDATED).await.unwrap();
    let mut created = handle.subscribe(topics::CASE_CREATED).await.unwrap();
    handle.connect();
    wait_connected(&handle).await;

    // Not JSON at all, then a valid envelope with an undecodable payload
    hub.push_raw("{ this is not json");
    hub.push_raw(r#"{"id":"e-1","topic":"case.updated","payload":{"case_id":42},"timestamp":"0Z"}"#);
    hub.push(&Envelope::new(
        topics::CASE_CREATED,
        serde_json::to_value(CaseCreated {
            case: support::invoice_case("c-9", 100),
        })
        .unwrap(),
    ));

    // Frames are delivered in order, so once the valid one arrives the
    // garbage before it has already been dropped
    let envelope = tokio::time::timeout(Duration::from_secs(2), created.recv())
        .await
        .expect("timed out waiting for valid frame")
        .expect("subscription closed");
    assert_eq!(envelope.topic, topics::CASE_CREATED);
    assert!(updates.try_recv().is_none());
    assert!(handle.is_connected());

    handle.shutdown().await;
}

#[tokio::test]
async fn reconnect_replays_interest_and_refreshes_watched_cases() {
    let mut hub = TestHub::start().await;
    hub.insert_case(support::invoice_case("c-2", 900));
    let handle = spawn_against(&hub);

    handle.subscribe_to_case("c-2");
    handle.connect();
    wait_connected(&handle).await;
    assert_eq!(
        hub.next_command(CMD_WAIT).await,
        Some(ClientCommand::subscribe_case("c-2"))
    );
    handle.load_case("c-2").await.unwrap();
    wait_for_case(&handle, "c-2", |c| {
        c.field("amount").is_some_and(|f| f.value == json!(900))
    })
    .await;

    // Server-side state moves on while we are away
    let mut amended = support::invoice_case("c-2", 1200);
    amended.title = "Invoice c-2 (amended)".to_string();
    hub.insert_case(amended);

    hub.drop_connections();
    let mut rx = handle.connection();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| matches!(s, ConnectionStatus::Connected { generation } if *generation >= 2)),
    )
    .await
    .expect("timed out waiting for reconnect")
    .expect("engine stopped while reconnecting");

    // Interest replays without any consumer involvement, and the watched
    // case is re-fetched to cover the gap
    assert_eq!(
        hub.next_command(CMD_WAIT).await,
        Some(ClientCommand::subscribe_case("c-2"))
    );
    wait_for_case(&handle, "c-2", |c| c.title.ends_with("(amended)")).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn field_edit_commits_over_http() {
    let hub = TestHub::start().await;
    hub.insert_case(support::invoice_case("c-1", 3500));
    let handle = spawn_against(&hub);
    handle.load_case("c-1").await.unwrap();

    let outcome = handle
        .save_field_edit("c-1", "amount", json!(3280))
        .await
        .unwrap();
    assert_eq!(outcome.value, json!(3280));

    let field = handle
        .case("c-1")
        .unwrap()
        .field("amount")
        .cloned()
        .unwrap();
    assert_eq!(field.value, json!(3280));
    assert!(field.manually_edited);
    assert_eq!(field.original_value, Some(json!(3500)));
    assert_eq!(field.edits.len(), 1);
    assert_eq!(field.edits[0].edit_id, outcome.edit_id);

    // The server applied the write too
    let server_side = hub.case("c-1").unwrap();
    assert_eq!(server_side.field("amount").unwrap().value, json!(3280));

    handle.shutdown().await;
}

#[tokio::test]
async fn rejected_write_rolls_the_field_back() {
    let hub = TestHub::start().await;
    hub.insert_case(support::invoice_case("c-1", 3500));
    let handle = spawn_against(&hub);
    handle.load_case("c-1").await.unwrap();
    hub.set_reject_writes(true);

    let err = handle
        .save_field_edit("c-1", "amount", json!(9_999_999))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EditError::Rejected {
            reason: "value out of range".to_string()
        }
    );

    let field = handle
        .case("c-1")
        .unwrap()
        .field("amount")
        .cloned()
        .unwrap();
    assert_eq!(field.value, json!(3500));
    assert!(!field.manually_edited);
    assert_eq!(field.original_value, None);
    assert!(field.edits.is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn bridge_alerts_on_failures_but_not_progress_ticks() {
    let mut hub = TestHub::start().await;
    let handle = spawn_against(&hub);
    let (alerts_tx, mut alerts_rx) = mpsc::channel(8);
    let bridge = NotificationBridge::spawn(&handle, alerts_tx).await.unwrap();
    handle.connect();
    wait_connected(&handle).await;

    hub.push(&Envelope::new(
        topics::EXTRACTION_PROGRESS,
        json!({ "case_id": "c-1", "completed": 3, "total": 9 }),
    ));
    hub.push(&Envelope::new(
        topics::RULES_COMPLETED,
        json!({ "case_id": "c-1", "passed": 4, "warnings": 1, "failed": 2 }),
    ));

    // The progress tick is silent; the first alert is the rules outcome,
    // at error severity because failures outrank warnings
    let alert = tokio::time::timeout(Duration::from_secs(2), alerts_rx.recv())
        .await
        .expect("timed out waiting for alert")
        .expect("alert channel closed");
    assert_eq!(alert.severity, AlertSeverity::Error);
    assert_eq!(alert.case_id.as_deref(), Some("c-1"));

    bridge.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn publish_reaches_the_server() {
    let mut hub = TestHub::start().await;
    let handle = spawn_against(&hub);
    handle.connect();
    wait_connected(&handle).await;

    handle
        .publish("case.note", json!({ "text": "needs review" }))
        .await
        .unwrap();
    assert_eq!(
        hub.next_command(CMD_WAIT).await,
        Some(ClientCommand::Publish {
            topic: "case.note".to_string(),
            payload: json!({ "text": "needs review" }),
        })
    );

    handle.shutdown().await;
}
