//! Membership Writer Actor
//!
//! Buffers incoming keepalives and persists them one at a time. The first
//! keepalive of an entity allocates its sequence number; later ones are merged
//! over the stored record. A store fault leaves the buffer untouched so the
//! update is retried after the engine's backoff.

use super::record::{Keepalive, MembershipRecord};
use super::sequence::next_sequence;
use std::collections::VecDeque;
use std::time::Duration;
use steward_core::observability::{events, metrics};
use steward_core::{Context, Fault, Layout, Machine, SharedStore, Transition};
use strum::Display;
use tracing::{debug, warn};

const SPIN: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum WriterState {
    Initial,
}

#[derive(Debug)]
pub enum MembershipMessage {
    Update(Keepalive),
}

pub struct MembershipWriter {
    store: SharedStore,
    layout: Layout,
    ttl: Duration,
}

impl MembershipWriter {
    pub fn new(store: SharedStore, layout: Layout, ttl: Duration) -> Self {
        Self { store, layout, ttl }
    }

    async fn persist(&self, update: Keepalive) -> Result<(), Fault> {
        let Some(entity) = update.entity_key() else {
            warn!(update = ?update, "keepalive without id, ip or key, dropped");
            return Ok(());
        };
        let path = self.layout.pod_key(&entity);

        let record = match self.store.read(&path).await? {
            Some(node) => match serde_json::from_str::<MembershipRecord>(&node.value) {
                Ok(mut record) => {
                    record.merge(update);
                    record
                }
                Err(e) => {
                    // left to expire, the entity re-registers once it is gone
                    warn!(key = %path, error = %e, "unreadable membership record, update dropped");
                    return Ok(());
                }
            },
            None => {
                let seq = next_sequence(self.store.as_ref(), &self.layout.sequence_key()).await?;
                events::sequence_assigned(self.layout.group(), &entity, seq);
                MembershipRecord::new(entity.clone(), seq, update)
            }
        };

        self.store
            .write(&path, &record.to_json()?, Some(self.ttl))
            .await?;
        metrics::record_membership_write();
        debug!(key = %entity, seq = record.seq, "keepalive persisted");
        Ok(())
    }
}

impl Machine for MembershipWriter {
    type State = WriterState;
    type Data = VecDeque<Keepalive>;
    type Message = MembershipMessage;

    const INITIAL: WriterState = WriterState::Initial;

    fn tag(&self) -> &'static str {
        "membership"
    }

    fn on_message(&mut self, fifo: &mut VecDeque<Keepalive>, message: MembershipMessage) {
        match message {
            MembershipMessage::Update(update) => fifo.push_back(update),
        }
    }

    async fn step(
        &mut self,
        state: WriterState,
        fifo: &mut VecDeque<Keepalive>,
        ctx: &Context,
    ) -> Result<Transition<WriterState>, Fault> {
        if ctx.is_terminating() && fifo.is_empty() {
            return ctx.abort("terminating");
        }

        while let Some(update) = fifo.front().cloned() {
            self.persist(update).await?;
            fifo.pop_front();
        }

        Ok(Transition::after(state, SPIN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use steward_core::store::{MemoryStore, Store};
    use steward_core::Actor;

    fn keepalive(ip: &str, payload: serde_json::Value) -> Keepalive {
        serde_json::from_value(json!({"id": ip, "ip": ip, "role": "db", "payload": payload})).unwrap()
    }

    async fn record(store: &MemoryStore, layout: &Layout, ip: &str) -> Option<MembershipRecord> {
        let key = layout.pod_key(&super::super::record::entity_key(ip));
        store
            .read(&key)
            .await
            .unwrap()
            .map(|node| serde_json::from_str(&node.value).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_entity_keeps_first_sequence() {
        let store = Arc::new(MemoryStore::new());
        let layout = Layout::new("app");
        let writer = Actor::start(MembershipWriter::new(
            store.clone(),
            layout.clone(),
            Duration::from_secs(10),
        ));

        writer.tell(MembershipMessage::Update(keepalive("10.0.0.1", json!({"v": 1})))).unwrap();
        writer.tell(MembershipMessage::Update(keepalive("10.0.0.1", json!({"v": 2})))).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let stored = record(&store, &layout, "10.0.0.1").await.unwrap();
        assert_eq!(stored.seq, 0);
        assert_eq!(stored.payload, json!({"v": 2}));
        assert_eq!(store.read(&layout.sequence_key()).await.unwrap().unwrap().value, "0");

        writer.tell(MembershipMessage::Update(keepalive("10.0.0.2", json!({})))).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(record(&store, &layout, "10.0.0.2").await.unwrap().seq, 1);
        assert_eq!(record(&store, &layout, "10.0.0.1").await.unwrap().seq, 0);

        writer.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_expires_and_reregisters() {
        let store = Arc::new(MemoryStore::new());
        let layout = Layout::new("app");
        let writer = Actor::start(MembershipWriter::new(
            store.clone(),
            layout.clone(),
            Duration::from_secs(2),
        ));

        writer.tell(MembershipMessage::Update(keepalive("10.0.0.1", json!({})))).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(record(&store, &layout, "10.0.0.1").await.is_some());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(record(&store, &layout, "10.0.0.1").await.is_none());

        writer.tell(MembershipMessage::Update(keepalive("10.0.0.1", json!({})))).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(record(&store, &layout, "10.0.0.1").await.unwrap().seq, 1);

        writer.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_updates_are_flushed_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let layout = Layout::new("app");
        let writer = Actor::start(MembershipWriter::new(
            store.clone(),
            layout.clone(),
            Duration::from_secs(10),
        ));
        for i in 1..=3 {
            writer
                .tell(MembershipMessage::Update(keepalive(&format!("10.0.0.{i}"), json!({}))))
                .unwrap();
        }
        writer.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.list(&layout.pods_dir()).await.unwrap().len(), 3);
    }
}
