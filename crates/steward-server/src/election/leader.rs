//! Leader Elector Actor
//!
//! Each coordinator replica appends a TTL-leased bid under the group's lock
//! directory. The bid with the lowest store-assigned index is the leader; the
//! comparison is repeated on every cycle and never cached. A failed refresh
//! aborts through `reset`, which deletes the bid and starts a new election.
//!
//! Only the leader runs change detection and dispatches the callback.

use super::detector::{ChangeDetector, Dispatch};
use super::snapshot::Snapshot;
use crate::config::ElectionConfig;
use crate::scripts::{CallbackMessage, Invocation, Job};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use steward_core::observability::{events, metrics};
use steward_core::store::LeasedKey;
use steward_core::{ActorRef, Context, Fault, Layout, Machine, SharedStore, StoreError, Transition};
use strum::Display;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ElectionState {
    Initial,
    Acquire,
    Watch,
}

#[derive(Debug, Default)]
pub struct ElectionData {
    lock: Option<LeasedKey>,
    leading: bool,
}

/// The elector takes no messages.
#[derive(Debug)]
pub enum ElectionMessage {}

pub struct LeaderElector {
    store: SharedStore,
    layout: Layout,
    config: ElectionConfig,
    detector: ChangeDetector,
    callback: Option<String>,
    callbacks: Option<ActorRef<CallbackMessage>>,
    leader: Arc<AtomicBool>,
}

impl LeaderElector {
    pub fn new(store: SharedStore, layout: Layout, config: ElectionConfig, detector: ChangeDetector) -> Self {
        Self {
            store,
            layout,
            config,
            detector,
            callback: None,
            callbacks: None,
            leader: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Command to run on membership changes and the actor that runs it.
    pub fn with_callback(mut self, command: Option<String>, runner: ActorRef<CallbackMessage>) -> Self {
        self.callback = command;
        self.callbacks = Some(runner);
        self
    }

    /// Flag mirroring whether this replica currently leads.
    pub fn with_status(mut self, leader: Arc<AtomicBool>) -> Self {
        self.leader = leader;
        self
    }

    pub fn status(&self) -> Arc<AtomicBool> {
        self.leader.clone()
    }

    async fn refresh(&self, data: &ElectionData, ctx: &Context) -> Result<(), Fault> {
        let Some(lock) = data.lock.as_ref() else {
            return ctx.abort("no lock key");
        };
        match self.store.refresh(lock, self.config.lock_ttl).await {
            Ok(()) => Ok(()),
            Err(StoreError::LeaseLost(_)) => ctx.abort("lost key"),
            Err(e) => Err(e.into()),
        }
    }

    async fn initial(
        &mut self,
        data: &mut ElectionData,
        ctx: &Context,
    ) -> Result<Transition<ElectionState>, Fault> {
        if ctx.is_terminating() {
            return ctx.abort("terminating");
        }
        self.detector.disarm();
        let lock = self
            .store
            .append(
                &self.layout.locks_dir(),
                self.layout.lock_prefix(),
                "",
                self.config.lock_ttl,
            )
            .await?;
        debug!(group = %self.layout.group(), lock_key = %lock.key, index = lock.index, "bid created");
        data.lock = Some(lock);
        Ok(Transition::now(ElectionState::Acquire))
    }

    async fn acquire(
        &mut self,
        data: &mut ElectionData,
        ctx: &Context,
    ) -> Result<Transition<ElectionState>, Fault> {
        if ctx.is_terminating() {
            return ctx.abort("terminating");
        }
        self.refresh(data, ctx).await?;

        let bids = self.store.list(&self.layout.locks_dir()).await?;
        let lowest = bids.iter().map(|node| node.index).min();
        let Some(lock) = data.lock.as_ref() else {
            return ctx.abort("no lock key");
        };

        if lowest == Some(lock.index) {
            data.leading = true;
            self.leader.store(true, Ordering::SeqCst);
            events::leadership_acquired(self.layout.group(), &lock.key);
            metrics::record_leadership(true);
            return Ok(Transition::now(ElectionState::Watch));
        }

        debug!(group = %self.layout.group(), bids = bids.len(), "not the lowest bid, waiting");
        Ok(Transition::after(ElectionState::Acquire, self.config.acquire_backoff))
    }

    async fn watch(
        &mut self,
        data: &mut ElectionData,
        ctx: &Context,
    ) -> Result<Transition<ElectionState>, Fault> {
        if ctx.is_terminating() {
            return ctx.abort("terminating");
        }
        self.refresh(data, ctx).await?;

        let nodes = self.store.list(&self.layout.pods_dir()).await?;
        let snapshot = Snapshot::from_nodes(&nodes);
        if let Some(dispatch) = self.detector.observe(&snapshot, Instant::now())? {
            self.publish(dispatch).await?;
        }

        Ok(Transition::after(ElectionState::Watch, self.config.watch_interval))
    }

    async fn publish(&self, dispatch: Dispatch) -> Result<(), Fault> {
        let group = self.layout.group();
        events::membership_changed(group, &dispatch.digest, dispatch.members);
        self.store
            .write(&self.layout.stamp_key(), &dispatch.digest, None)
            .await?;

        let (Some(command), Some(runner)) = (self.callback.as_ref(), self.callbacks.as_ref()) else {
            warn!(group = %group, digest = %dispatch.digest, "no callback configured, skipped");
            return Ok(());
        };

        let job = Job::exec(command.as_str())
            .env("HASH", dispatch.digest.as_str())
            .env("MD5", dispatch.digest.as_str())
            .env("PODS", dispatch.pods);
        let invocation = Invocation {
            job,
            digest: dispatch.digest.clone(),
        };
        match runner.tell(CallbackMessage::Invoke(invocation)) {
            Ok(()) => events::callback_dispatched(group, command, &dispatch.digest),
            Err(e) => warn!(group = %group, error = %e, "callback runner unavailable"),
        }
        Ok(())
    }
}

impl Machine for LeaderElector {
    type State = ElectionState;
    type Data = ElectionData;
    type Message = ElectionMessage;

    const INITIAL: ElectionState = ElectionState::Initial;

    fn tag(&self) -> &'static str {
        "election"
    }

    fn on_message(&mut self, _data: &mut ElectionData, message: ElectionMessage) {
        match message {}
    }

    async fn step(
        &mut self,
        state: ElectionState,
        data: &mut ElectionData,
        ctx: &Context,
    ) -> Result<Transition<ElectionState>, Fault> {
        match state {
            ElectionState::Initial => self.initial(data, ctx).await,
            ElectionState::Acquire => self.acquire(data, ctx).await,
            ElectionState::Watch => self.watch(data, ctx).await,
        }
    }

    async fn reset(
        &mut self,
        data: &mut ElectionData,
        fault: &Fault,
        _ctx: &Context,
    ) -> Transition<ElectionState> {
        if let Some(lock) = data.lock.take() {
            if let Err(e) = self.store.delete(&lock.key).await {
                debug!(lock_key = %lock.key, error = %e, "bid could not be deleted");
            }
            if data.leading {
                events::leadership_lost(self.layout.group(), &lock.key, &fault.to_string());
                metrics::record_leadership(false);
            }
        }
        data.leading = false;
        self.leader.store(false, Ordering::SeqCst);
        Transition::now(ElectionState::Initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use steward_core::store::{MemoryStore, Store};
    use steward_core::Actor;

    fn config() -> ElectionConfig {
        ElectionConfig {
            lock_ttl: Duration::from_secs(10),
            acquire_backoff: Duration::from_secs(2),
            watch_interval: Duration::from_secs(1),
        }
    }

    fn elector(store: &Arc<MemoryStore>) -> LeaderElector {
        LeaderElector::new(
            store.clone(),
            Layout::new("app"),
            config(),
            ChangeDetector::new(Duration::ZERO),
        )
    }

    /// Stands in for the callback runner and keeps what it was sent.
    struct Sink(Arc<Mutex<Vec<Invocation>>>);

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
    enum SinkState {
        Idle,
    }

    impl Machine for Sink {
        type State = SinkState;
        type Data = ();
        type Message = CallbackMessage;

        const INITIAL: SinkState = SinkState::Idle;

        fn tag(&self) -> &'static str {
            "sink"
        }

        fn on_message(&mut self, _data: &mut (), message: CallbackMessage) {
            let CallbackMessage::Invoke(invocation) = message;
            self.0.lock().unwrap().push(invocation);
        }

        async fn step(
            &mut self,
            state: SinkState,
            _data: &mut (),
            ctx: &Context,
        ) -> Result<Transition<SinkState>, Fault> {
            if ctx.is_terminating() {
                return ctx.abort("terminating");
            }
            Ok(Transition::after(state, Duration::from_millis(100)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_lowest_bid_leads() {
        let store = Arc::new(MemoryStore::new());
        let first = elector(&store);
        let first_leads = first.status();
        let first = Actor::start(first);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = elector(&store);
        let second_leads = second.status();
        let second = Actor::start(second);

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(first_leads.load(Ordering::SeqCst));
            assert!(!second_leads.load(Ordering::SeqCst));
        }

        // stepping down deletes the bid, the other replica takes over
        first.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(!first_leads.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(second_leads.load(Ordering::SeqCst));
        assert_eq!(store.list(&Layout::new("app").locks_dir()).await.unwrap().len(), 1);

        second.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(store.list(&Layout::new("app").locks_dir()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lease_relinquishes_leadership() {
        let store = Arc::new(MemoryStore::new());
        let layout = Layout::new("app");
        let first = elector(&store);
        let first_leads = first.status();
        let first = Actor::start(first);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = elector(&store);
        let second_leads = second.status();
        let second = Actor::start(second);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(first_leads.load(Ordering::SeqCst));

        // the leader's bid vanishes, as if its lease had expired
        let bids = store.list(&layout.locks_dir()).await.unwrap();
        let lowest = bids.iter().min_by_key(|node| node.index).unwrap();
        store.delete(&lowest.key).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!first_leads.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(second_leads.load(Ordering::SeqCst));
        assert!(!first_leads.load(Ordering::SeqCst));

        first.shutdown(Duration::from_secs(1)).await.unwrap();
        second.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_dispatches_membership_changes() {
        let store = Arc::new(MemoryStore::new());
        let layout = Layout::new("app");
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Actor::start(Sink(received.clone()));

        let pod = serde_json::json!({"key": "a", "role": "db", "seq": 0, "payload": {}}).to_string();
        store
            .write(&layout.pod_key("a"), &pod, Some(Duration::from_secs(60)))
            .await
            .unwrap();

        let leader = Actor::start(elector(&store).with_callback(Some("/bin/true".into()), sink.clone()));
        tokio::time::sleep(Duration::from_secs(3)).await;

        let invocations = received.lock().unwrap().clone();
        assert_eq!(invocations.len(), 1);
        let digest = &invocations[0].digest;
        assert_eq!(
            store.read(&layout.stamp_key()).await.unwrap().unwrap().value,
            *digest
        );
        let env = &invocations[0].job.env;
        assert!(env.contains(&("HASH".to_string(), digest.clone())));
        assert!(env.contains(&("MD5".to_string(), digest.clone())));
        assert!(env.iter().any(|(name, value)| name == "PODS" && value.contains("\"key\":\"a\"")));

        // a second member yields a second dispatch
        let pod = serde_json::json!({"key": "b", "role": "db", "seq": 1, "payload": {}}).to_string();
        store
            .write(&layout.pod_key("b"), &pod, Some(Duration::from_secs(60)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(received.lock().unwrap().len(), 2);

        leader.shutdown(Duration::from_secs(1)).await.unwrap();
        sink.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}
