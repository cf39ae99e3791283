//! Topic routing: which consumer hears about what
//!
//! Registrations are plain channels. A consumer that went away shows up as
//! a closed receiver and is pruned on the next dispatch; one dead consumer
//! never stops delivery to the others.

use std::collections::HashMap;

use docket_protocol::Envelope;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identity of one topic registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn raw(&self) -> u64 {
        self.0
    }
}

struct Registration {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Routing table owned by the engine actor.
///
/// Case interest is refcounted separately from registrations: several
/// consumers can watch the same case while the server sees a single
/// subscription.
pub(crate) struct TopicRouter {
    next_id: u64,
    by_topic: HashMap<String, Vec<Registration>>,
    topic_of: HashMap<SubscriptionId, String>,
    case_refs: HashMap<String, usize>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            by_topic: HashMap::new(),
            topic_of: HashMap::new(),
            case_refs: HashMap::new(),
        }
    }

    /// Register a consumer channel for a topic
    pub fn register(&mut self, topic: &str, tx: mpsc::UnboundedSender<Envelope>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.by_topic
            .entry(topic.to_string())
            .or_default()
            .push(Registration { id, tx });
        self.topic_of.insert(id, topic.to_string());
        debug!(
            component = "router",
            event = "topic.registered",
            topic,
            subscription_id = id.raw(),
            "Registered topic consumer"
        );
        id
    }

    /// Remove one registration; safe to call twice for the same handle
    pub fn unregister(&mut self, id: SubscriptionId) -> bool {
        let Some(topic) = self.topic_of.remove(&id) else {
            return false;
        };
        if let Some(regs) = self.by_topic.get_mut(&topic) {
            regs.retain(|r| r.id != id);
            if regs.is_empty() {
                self.by_topic.remove(&topic);
            }
        }
        debug!(
            component = "router",
            event = "topic.unregistered",
            topic,
            subscription_id = id.raw(),
            "Removed topic consumer"
        );
        true
    }

    /// Deliver an envelope to every live consumer of its topic, in
    /// registration order. Closed consumers are pruned afterwards.
    pub fn dispatch(&mut self, envelope: &Envelope) -> usize {
        let Some(regs) = self.by_topic.get_mut(&envelope.topic) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead: Vec<SubscriptionId> = Vec::new();
        for reg in regs.iter() {
            if reg.tx.send(envelope.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(reg.id);
            }
        }

        if !dead.is_empty() {
            regs.retain(|r| !dead.contains(&r.id));
            let now_empty = regs.is_empty();
            if now_empty {
                self.by_topic.remove(&envelope.topic);
            }
            for id in &dead {
                self.topic_of.remove(id);
            }
            debug!(
                component = "router",
                event = "topic.pruned",
                topic = %envelope.topic,
                pruned = dead.len(),
                "Pruned closed topic consumers"
            );
        }

        delivered
    }

    /// Bump the interest count for a case. Returns true on the 0 -> 1
    /// transition, when the server-side subscription must be opened.
    pub fn retain_case(&mut self, case_id: &str) -> bool {
        let count = self.case_refs.entry(case_id.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop one interest count for a case. Returns true on the 1 -> 0
    /// transition, when the server-side subscription must be closed.
    /// Releasing below zero is clamped and logged, never underflows.
    pub fn release_case(&mut self, case_id: &str) -> bool {
        match self.case_refs.get_mut(case_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.case_refs.remove(case_id);
                true
            }
            None => {
                warn!(
                    component = "router",
                    event = "case.release_unbalanced",
                    case_id,
                    "Release for a case with no active interest; ignoring"
                );
                false
            }
        }
    }

    /// Cases with at least one interested consumer, for subscription replay
    pub fn live_cases(&self) -> Vec<String> {
        self.case_refs.keys().cloned().collect()
    }

    #[cfg(test)]
    pub fn case_ref_count(&self, case_id: &str) -> usize {
        self.case_refs.get(case_id).copied().unwrap_or(0)
    }
}

/// Consumer end of one topic registration.
///
/// Dropping the handle unregisters it from the router; no explicit
/// bookkeeping is needed on the consumer side.
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    rx: mpsc::UnboundedReceiver<Envelope>,
    drop_tx: mpsc::UnboundedSender<SubscriptionId>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        topic: String,
        rx: mpsc::UnboundedReceiver<Envelope>,
        drop_tx: mpsc::UnboundedSender<SubscriptionId>,
    ) -> Self {
        Self {
            id,
            topic,
            rx,
            drop_tx,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next envelope for this topic. Returns `None` once the engine is
    /// gone and buffered envelopes are drained.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Explicit unregistration; equivalent to dropping the handle
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.drop_tx.send(self.id);
    }
}
