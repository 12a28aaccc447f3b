//! Node Bootstrap
//!
//! Starts the actors a node needs for its configured roles and owns them in a
//! [`Registry`] until shutdown.
//!
//! - always: the script runner behind `/script` and `/action/{key}`
//! - coordinator: membership writer, callback runner, leader elector
//! - worker: keepalive sender

use crate::api::AppState;
use crate::config::{Settings, StoreSettings};
use crate::election::{ChangeDetector, LeaderElector};
use crate::membership::MembershipWriter;
use crate::scripts::{CallbackRunner, ScriptRunner};
use crate::worker::KeepaliveSender;
use anyhow::Context as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use steward_core::observability::MetricsState;
use steward_core::store::{EtcdConnectConfig, EtcdStore, MemoryStore};
use steward_core::{Actor, Layout, Registry, SharedStore};
use tracing::info;

pub struct Node {
    registry: Registry,
    state: AppState,
}

impl Node {
    pub async fn start(settings: &Settings, metrics_state: Option<MetricsState>) -> anyhow::Result<Self> {
        let layout = Layout::new(&settings.group);
        let mut registry = Registry::default();
        let leader = Arc::new(AtomicBool::new(false));

        let scripts = Actor::start(ScriptRunner);
        registry.register(scripts.handle());

        let mut store = None;
        let mut membership = None;
        if settings.coordinator {
            let shared = connect(&settings.store).await?;

            let writer = Actor::start(MembershipWriter::new(
                shared.clone(),
                layout.clone(),
                settings.ttl,
            ));
            registry.register(writer.handle());

            let callbacks = Actor::start(CallbackRunner::new(shared.clone(), layout.clone()));
            registry.register(callbacks.handle());

            let elector = LeaderElector::new(
                shared.clone(),
                layout.clone(),
                settings.election.clone(),
                ChangeDetector::new(settings.damper),
            )
            .with_callback(settings.callback.clone(), callbacks)
            .with_status(leader.clone());
            registry.register(Actor::start(elector).handle());

            store = Some(shared);
            membership = Some(writer);
        }

        if settings.worker {
            if let Some(url) = settings.coordinator_url.as_deref() {
                let keepalive = Actor::start(KeepaliveSender::new(
                    url,
                    &settings.group,
                    settings.identity.clone(),
                    settings.payload_file.clone(),
                    settings.ttl,
                ));
                registry.register(keepalive.handle());
            }
        }

        info!(group = %settings.group, actors = ?registry.tags(), "node started");
        let state = AppState {
            store,
            layout,
            membership,
            scripts,
            action_timeout: settings.action_timeout,
            readiness: Arc::new(AtomicBool::new(true)),
            leader,
            metrics_state,
        };
        Ok(Self { registry, state })
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Stop every actor, bounded by the registry timeout.
    pub async fn shutdown(mut self) {
        self.state.readiness.store(false, Ordering::Release);
        let failed = self.registry.shutdown_all().await;
        info!(failed = failed.len(), "node stopped");
    }
}

async fn connect(settings: &StoreSettings) -> anyhow::Result<SharedStore> {
    match settings {
        StoreSettings::Etcd { endpoints } => {
            info!(endpoints = ?endpoints, "connecting to etcd");
            let store = EtcdStore::connect(endpoints, &EtcdConnectConfig::default())
                .await
                .with_context(|| format!("failed to connect to etcd at {endpoints:?}"))?;
            Ok(Arc::new(store))
        }
        StoreSettings::Memory => {
            info!("using the in-memory store, state is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
