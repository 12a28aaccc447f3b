//! Keepalive Actor
//!
//! Periodically `PUT`s this worker's identity and payload to
//! `<coordinator>/ping`. The payload is re-read from disk on every tick; a
//! missing or unparsable file is sent as `{}`. A failed request is a fault so
//! the engine's restart backoff spaces out the retries.

use crate::config::Identity;
use crate::membership::Keepalive;
use anyhow::Context as _;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use steward_core::{Context, Fault, Machine, Transition};
use strum::Display;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum KeepaliveState {
    Ping,
}

/// The sender takes no messages.
#[derive(Debug)]
pub enum KeepaliveMessage {}

pub struct KeepaliveSender {
    client: reqwest::Client,
    url: String,
    group: String,
    identity: Identity,
    payload_file: Option<PathBuf>,
    interval: Duration,
}

impl KeepaliveSender {
    /// `ttl` is the membership lease; keepalives go out every three quarters of it.
    pub fn new(
        coordinator: &str,
        group: &str,
        identity: Identity,
        payload_file: Option<PathBuf>,
        ttl: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/ping", coordinator.trim_end_matches('/')),
            group: group.to_string(),
            identity,
            payload_file,
            interval: ttl.mul_f64(0.75),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn payload(&self) -> Value {
        let Some(path) = self.payload_file.as_ref() else {
            return Value::Object(Default::default());
        };
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                debug!(path = %path.display(), error = %e, "payload is not JSON, sending {{}}");
                Value::Object(Default::default())
            }),
            Err(_) => Value::Object(Default::default()),
        }
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let body = Keepalive {
            app: Some(self.group.clone()),
            id: Some(self.identity.id.clone()),
            ip: self.identity.ip.clone(),
            key: self.identity.key.clone(),
            role: self.identity.role.clone(),
            payload: self.payload().await,
        };
        self.client
            .put(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("keepalive to {} failed", self.url))?
            .error_for_status()
            .with_context(|| format!("keepalive rejected by {}", self.url))?;
        debug!(url = %self.url, "keepalive sent");
        Ok(())
    }
}

impl Machine for KeepaliveSender {
    type State = KeepaliveState;
    type Data = ();
    type Message = KeepaliveMessage;

    const INITIAL: KeepaliveState = KeepaliveState::Ping;

    fn tag(&self) -> &'static str {
        "keepalive"
    }

    fn on_message(&mut self, _data: &mut (), message: KeepaliveMessage) {
        match message {}
    }

    async fn step(
        &mut self,
        state: KeepaliveState,
        _data: &mut (),
        ctx: &Context,
    ) -> Result<Transition<KeepaliveState>, Fault> {
        if ctx.is_terminating() {
            return ctx.abort("terminating");
        }
        self.ping().await?;
        Ok(Transition::after(state, self.interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::put, Json, Router};
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use steward_core::Actor;

    type Received = Arc<Mutex<Vec<Keepalive>>>;

    async fn coordinator() -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/ping",
                put(|State(received): State<Received>, Json(body): Json<Keepalive>| async move {
                    received.lock().unwrap().push(body);
                    "OK"
                }),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), received)
    }

    fn identity() -> Identity {
        Identity {
            id: "worker-1".into(),
            ip: Some("10.0.0.7".into()),
            key: None,
            role: "db".into(),
        }
    }

    #[test]
    fn test_interval_is_three_quarters_of_ttl() {
        let sender = KeepaliveSender::new("http://c:8000/", "app", identity(), None, Duration::from_secs(10));
        assert_eq!(sender.interval(), Duration::from_millis(7500));
        assert_eq!(sender.url, "http://c:8000/ping");
    }

    #[tokio::test]
    async fn test_payload_file_is_sent() {
        let (url, received) = coordinator().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 6379}}"#).unwrap();

        let sender = Actor::start(KeepaliveSender::new(
            &url,
            "app",
            identity(),
            Some(file.path().to_path_buf()),
            Duration::from_millis(400),
        ));
        tokio::time::sleep(Duration::from_millis(800)).await;
        sender.shutdown(Duration::from_secs(5)).await.unwrap();

        let received = received.lock().unwrap();
        assert!(received.len() >= 2);
        assert_eq!(received[0].app.as_deref(), Some("app"));
        assert_eq!(received[0].ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(received[0].role, "db");
        assert_eq!(received[0].payload, serde_json::json!({"port": 6379}));
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_sent_empty() {
        let (url, received) = coordinator().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let sender = Actor::start(KeepaliveSender::new(
            &url,
            "app",
            identity(),
            Some(file.path().to_path_buf()),
            Duration::from_secs(10),
        ));
        tokio::time::sleep(Duration::from_millis(300)).await;
        sender.shutdown(Duration::from_secs(5)).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload, serde_json::json!({}));
    }
}
