//! The sync engine actor and its consumer-facing handle.
//!
//! One task owns every piece of mutable state: the topic router, the case
//! store, and the ledger of in-flight edits. Everything else talks to it
//! over channels, so mutation handlers run to completion one at a time and
//! the store never needs a lock. Remote IO (the write API, case fetches)
//! runs on spawned tasks that report back as commands, keeping the actor
//! loop non-blocking.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use docket_protocol::{topics, CaseRecord, ClientCommand, Envelope};

use crate::api::{CaseReadApi, FieldWriteApi};
use crate::config::SyncConfig;
use crate::edits::{EditLedger, EditOutcome, FieldKey, PendingEdit, WriteOutcome};
use crate::error::{ApiError, ConfigError, EditError, EngineClosed, StoreError, TransportError};
use crate::push::{apply_push, PushEffect};
use crate::router::{Subscription, SubscriptionId, TopicRouter};
use crate::store::{CaseQuery, CaseStore, StoreSnapshot};
use crate::transport::{ConnectionStatus, TransportEvent, TransportHandle};

pub(crate) enum EngineCommand {
    Register {
        topic: String,
        tx: mpsc::UnboundedSender<Envelope>,
        reply: oneshot::Sender<SubscriptionId>,
    },
    RetainCase {
        case_id: String,
    },
    ReleaseCase {
        case_id: String,
    },
    Publish {
        topic: String,
        payload: Value,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    SaveFieldEdit {
        case_id: String,
        field_id: String,
        value: Value,
        reply: oneshot::Sender<Result<EditOutcome, EditError>>,
    },
    ResolveEdit {
        key: FieldKey,
        outcome: WriteOutcome,
    },
    SetAll {
        records: Vec<CaseRecord>,
        reply: oneshot::Sender<()>,
    },
    LoadCase {
        case_id: String,
        reply: oneshot::Sender<Result<(), ApiError>>,
    },
    SeedCase {
        case_id: String,
        result: Result<CaseRecord, ApiError>,
        reply: Option<oneshot::Sender<Result<(), ApiError>>>,
    },
    Connect,
    Disconnect,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Spawns the engine actor and its transport task.
pub struct SyncEngine;

impl SyncEngine {
    pub fn spawn(
        config: SyncConfig,
        read_api: Arc<dyn CaseReadApi>,
        write_api: Arc<dyn FieldWriteApi>,
    ) -> Result<SyncHandle, ConfigError> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (drop_tx, drop_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let transport = TransportHandle::spawn(&config, event_tx)?;
        let status_rx = transport.watch_status();

        let store = CaseStore::new();
        let snapshot = store.snapshot_handle();

        let actor = EngineActor {
            router: TopicRouter::new(),
            store,
            ledger: EditLedger::default(),
            transport,
            read_api,
            write_api,
            cmd_tx: cmd_tx.clone(),
            cmd_rx,
            event_rx,
            drop_rx,
        };
        tokio::spawn(actor.run());

        Ok(SyncHandle {
            cmd_tx,
            drop_tx,
            snapshot,
            status_rx,
        })
    }
}

/// Cheap-to-clone handle onto a running sync engine.
///
/// Store reads go through a lock-free snapshot and never touch the actor;
/// everything else is a message to it.
#[derive(Clone)]
pub struct SyncHandle {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    drop_tx: mpsc::UnboundedSender<SubscriptionId>,
    snapshot: Arc<ArcSwap<StoreSnapshot>>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl SyncHandle {
    /// Register interest in one topic. The returned handle unregisters
    /// itself when dropped.
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, EngineClosed> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe_with(topic, tx).await?;
        Ok(Subscription::new(
            id,
            topic.to_string(),
            rx,
            self.drop_tx.clone(),
        ))
    }

    /// Registration onto a caller-owned channel, so one consumer can fan
    /// several topics into a single receiver.
    pub(crate) async fn subscribe_with(
        &self,
        topic: &str,
        tx: mpsc::UnboundedSender<Envelope>,
    ) -> Result<SubscriptionId, EngineClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Register {
                topic: topic.to_string(),
                tx,
                reply: reply_tx,
            })
            .map_err(|_| EngineClosed)?;
        reply_rx.await.map_err(|_| EngineClosed)
    }

    pub(crate) fn unregister(&self, id: SubscriptionId) {
        let _ = self.drop_tx.send(id);
    }

    /// Declare interest in one case. The first interested consumer opens
    /// the server-side subscription; later calls only bump a refcount.
    pub fn subscribe_to_case(&self, case_id: &str) {
        let _ = self.cmd_tx.send(EngineCommand::RetainCase {
            case_id: case_id.to_string(),
        });
    }

    /// Drop one unit of interest in a case. The server-side unsubscribe
    /// goes out only when the last consumer lets go.
    pub fn unsubscribe_from_case(&self, case_id: &str) {
        let _ = self.cmd_tx.send(EngineCommand::ReleaseCase {
            case_id: case_id.to_string(),
        });
    }

    /// Send an application frame to the server. Fails fast when the link
    /// is down rather than queueing indefinitely.
    pub async fn publish(&self, topic: &str, payload: Value) -> Result<(), TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Publish {
                topic: topic.to_string(),
                payload,
                reply: reply_tx,
            })
            .map_err(|_| TransportError::Closed)?;
        reply_rx.await.map_err(|_| TransportError::Closed)?
    }

    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected()
    }

    /// Watch connection state changes. `Connected { generation }` past 1
    /// means the session was rebuilt after a drop; consumers that need
    /// gapless data should re-fetch when they see it.
    pub fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Current store snapshot; immutable and safe to hold across awaits.
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshot.load_full()
    }

    /// Filtered, sorted case listing computed from the current snapshot.
    pub fn query(&self, query: &CaseQuery) -> Vec<CaseRecord> {
        let snapshot = self.snapshot.load_full();
        snapshot.query(query).into_iter().cloned().collect()
    }

    pub fn case(&self, case_id: &str) -> Option<CaseRecord> {
        self.snapshot.load().get(case_id).cloned()
    }

    /// Wholesale store replacement, for the initial load.
    pub async fn set_all(&self, records: Vec<CaseRecord>) -> Result<(), EngineClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::SetAll {
                records,
                reply: reply_tx,
            })
            .map_err(|_| EngineClosed)?;
        reply_rx.await.map_err(|_| EngineClosed)
    }

    /// Fetch one case through the read API and seed it into the store.
    pub async fn load_case(&self, case_id: &str) -> Result<(), ApiError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::LoadCase {
                case_id: case_id.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| ApiError::Request(EngineClosed.to_string()))?;
        reply_rx
            .await
            .map_err(|_| ApiError::Request(EngineClosed.to_string()))?
    }

    /// Optimistically apply a manual field edit and push it to the server.
    ///
    /// The store mutation is visible immediately. The returned future
    /// resolves when the remote write commits or rejects; rejection rolls
    /// the field back to its pre-edit state before the error is returned.
    pub async fn save_field_edit(
        &self,
        case_id: &str,
        field_id: &str,
        value: Value,
    ) -> Result<EditOutcome, EditError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::SaveFieldEdit {
                case_id: case_id.to_string(),
                field_id: field_id.to_string(),
                value,
                reply: reply_tx,
            })
            .map_err(|_| EditError::EngineClosed)?;
        reply_rx.await.map_err(|_| EditError::EngineClosed)?
    }

    pub fn connect(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Connect);
    }

    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Disconnect);
    }

    /// Stop the engine. Idempotent; later calls are no-ops.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(EngineCommand::Shutdown { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

struct EngineActor {
    router: TopicRouter,
    store: CaseStore,
    ledger: EditLedger,
    transport: TransportHandle,
    read_api: Arc<dyn CaseReadApi>,
    write_api: Arc<dyn FieldWriteApi>,
    /// Clone handed to spawned IO tasks so results come back as commands
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
    event_rx: mpsc::UnboundedReceiver<TransportEvent>,
    drop_rx: mpsc::UnboundedReceiver<SubscriptionId>,
}

impl EngineActor {
    async fn run(mut self) {
        info!(component = "engine", event = "sync.started", "Sync engine running");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => break,
                },
                event = self.event_rx.recv() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => break,
                },
                dropped = self.drop_rx.recv() => match dropped {
                    Some(id) => {
                        self.router.unregister(id);
                    }
                    None => break,
                },
            }
        }
        info!(component = "engine", event = "sync.stopped", "Sync engine stopped");
    }

    /// Returns false when the actor should stop.
    fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Register { topic, tx, reply } => {
                let id = self.router.register(&topic, tx);
                if reply.send(id).is_err() {
                    // Caller vanished between request and ack
                    self.router.unregister(id);
                }
            }
            EngineCommand::RetainCase { case_id } => {
                if self.router.retain_case(&case_id) {
                    self.send_case_command(&case_id, true);
                }
            }
            EngineCommand::ReleaseCase { case_id } => {
                if self.router.release_case(&case_id) {
                    self.send_case_command(&case_id, false);
                }
            }
            EngineCommand::Publish {
                topic,
                payload,
                reply,
            } => {
                let result = self
                    .transport
                    .send(ClientCommand::Publish { topic, payload });
                let _ = reply.send(result);
            }
            EngineCommand::SaveFieldEdit {
                case_id,
                field_id,
                value,
                reply,
            } => self.begin_field_edit(case_id, field_id, value, reply),
            EngineCommand::ResolveEdit { key, outcome } => self.resolve_edit(key, outcome),
            EngineCommand::SetAll { records, reply } => {
                self.store.set_all(records);
                let _ = reply.send(());
            }
            EngineCommand::LoadCase { case_id, reply } => {
                self.spawn_case_fetch(case_id, Some(reply));
            }
            EngineCommand::SeedCase {
                case_id,
                result,
                reply,
            } => {
                let outcome = match result {
                    Ok(record) => {
                        self.store.insert(record);
                        debug!(
                            component = "engine",
                            event = "sync.case_seeded",
                            case_id = %case_id,
                            "Seeded case from read API"
                        );
                        Ok(())
                    }
                    Err(err) => {
                        warn!(
                            component = "engine",
                            event = "sync.case_fetch_failed",
                            case_id = %case_id,
                            error = %err,
                            "Case fetch failed"
                        );
                        Err(err)
                    }
                };
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            EngineCommand::Connect => self.transport.connect(),
            EngineCommand::Disconnect => self.transport.disconnect(),
            EngineCommand::Shutdown { reply } => {
                self.transport.disconnect();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Up { generation } => {
                let live = self.router.live_cases();
                info!(
                    component = "engine",
                    event = "sync.link_up",
                    generation,
                    live_cases = live.len(),
                    "Link up; replaying case subscriptions"
                );
                for case_id in &live {
                    self.send_case_command(case_id, true);
                }
                if generation > 1 {
                    // Frames may have been missed while down; refresh every
                    // case someone is still watching.
                    for case_id in live {
                        self.spawn_case_fetch(case_id, None);
                    }
                }
            }
            TransportEvent::Down { reason } => {
                info!(
                    component = "engine",
                    event = "sync.link_down",
                    reason = %reason,
                    "Link down; transport is retrying"
                );
            }
            TransportEvent::Frame(envelope) => self.handle_frame(envelope),
        }
    }

    /// Store first, then fan out. A frame whose payload does not decode
    /// for a store-affecting topic is dropped whole; consumers never see
    /// a frame the store refused.
    fn handle_frame(&mut self, envelope: Envelope) {
        match apply_push(&mut self.store, &envelope.topic, &envelope.payload) {
            PushEffect::Malformed => {
                warn!(
                    component = "engine",
                    event = "sync.frame_dropped",
                    topic = %envelope.topic,
                    envelope_id = %envelope.id,
                    "Dropped malformed frame before dispatch"
                );
            }
            _ => {
                self.router.dispatch(&envelope);
            }
        }
    }

    fn send_case_command(&self, case_id: &str, subscribe: bool) {
        let command = if subscribe {
            ClientCommand::subscribe_case(case_id)
        } else {
            ClientCommand::unsubscribe_case(case_id)
        };
        // Offline transitions are fine; the live set replays on the next
        // link-up.
        if let Err(err) = self.transport.send(command) {
            debug!(
                component = "engine",
                event = "sync.case_command_deferred",
                case_id,
                subscribe,
                error = %err,
                "Case subscription change not sent; link is down"
            );
        }
    }

    fn begin_field_edit(
        &mut self,
        case_id: String,
        field_id: String,
        value: Value,
        reply: oneshot::Sender<Result<EditOutcome, EditError>>,
    ) {
        let key: FieldKey = (case_id.clone(), field_id.clone());
        if self.ledger.is_in_flight(&key) {
            let _ = reply.send(Err(EditError::EditInFlight { field_id }));
            return;
        }

        let undo = match self.store.apply_field_edit(&case_id, &field_id, value.clone()) {
            Ok(undo) => undo,
            Err(StoreError::CaseNotFound { case_id }) => {
                let _ = reply.send(Err(EditError::CaseNotFound { case_id }));
                return;
            }
            Err(StoreError::FieldNotFound { case_id, field_id }) => {
                let _ = reply.send(Err(EditError::FieldNotFound { case_id, field_id }));
                return;
            }
        };

        let pending = PendingEdit {
            undo,
            reply: Some(reply),
        };
        if self.ledger.begin(key.clone(), pending).is_err() {
            // The in-flight check above runs in this same task, so a
            // double begin cannot happen.
            return;
        }
        debug!(
            component = "engine",
            event = "edit.begun",
            case_id = %key.0,
            field_id = %key.1,
            "Optimistic edit applied; write in flight"
        );

        let api = self.write_api.clone();
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let outcome = match api.submit_field_update(&key.0, &key.1, value).await {
                Ok(snapshot) => WriteOutcome::Committed(snapshot),
                Err(ApiError::Rejected { reason }) => WriteOutcome::Rejected { reason },
                Err(err) => WriteOutcome::Rejected {
                    reason: err.to_string(),
                },
            };
            let _ = cmd_tx.send(EngineCommand::ResolveEdit { key, outcome });
        });
    }

    /// Every begun edit lands here exactly once, as a commit or a
    /// rollback. Local `edit.*` envelopes go through the router before
    /// the caller's reply resolves, so subscribers observe the outcome
    /// no later than the caller does.
    fn resolve_edit(&mut self, key: FieldKey, outcome: WriteOutcome) {
        let Some(pending) = self.ledger.resolve(&key) else {
            warn!(
                component = "engine",
                event = "edit.resolve_orphaned",
                case_id = %key.0,
                field_id = %key.1,
                "Write resolution for an edit the ledger does not hold"
            );
            return;
        };
        let (case_id, field_id) = key;

        match outcome {
            WriteOutcome::Committed(snapshot) => {
                self.store.apply_committed_edit(&snapshot);
                let envelope = Envelope::new(
                    topics::EDIT_COMMITTED,
                    json!({
                        "case_id": case_id,
                        "field_id": field_id,
                        "edit_id": snapshot.edit_id,
                        "value": snapshot.value,
                    }),
                );
                self.router.dispatch(&envelope);
                debug!(
                    component = "engine",
                    event = "edit.committed",
                    case_id = %case_id,
                    field_id = %field_id,
                    edit_id = %snapshot.edit_id,
                    "Edit committed"
                );
                if let Some(reply) = pending.reply {
                    let _ = reply.send(Ok(EditOutcome {
                        edit_id: snapshot.edit_id,
                        case_id,
                        field_id,
                        value: snapshot.value,
                    }));
                }
            }
            WriteOutcome::Rejected { reason } => {
                let rolled_back = self.store.rollback_field_edit(&case_id, &field_id, pending.undo);
                warn!(
                    component = "engine",
                    event = "edit.rejected",
                    case_id = %case_id,
                    field_id = %field_id,
                    reason = %reason,
                    rolled_back,
                    "Edit rejected; field restored"
                );
                let envelope = Envelope::new(
                    topics::EDIT_REJECTED,
                    json!({
                        "case_id": case_id,
                        "field_id": field_id,
                        "reason": reason,
                    }),
                );
                self.router.dispatch(&envelope);
                if let Some(reply) = pending.reply {
                    let _ = reply.send(Err(EditError::Rejected { reason }));
                }
            }
        }
    }

    fn spawn_case_fetch(
        &self,
        case_id: String,
        reply: Option<oneshot::Sender<Result<(), ApiError>>>,
    ) {
        let api = self.read_api.clone();
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_case(&case_id).await;
            let _ = cmd_tx.send(EngineCommand::SeedCase {
                case_id,
                result,
                reply,
            });
        });
    }
}
