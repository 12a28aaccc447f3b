//! Configuration
//!
//! Command line flags with `STEWARD_*` environment fallbacks, resolved into
//! [`Settings`] once at startup. Anything missing here is fatal.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_ETCD_ENDPOINT: &str = "http://127.0.0.1:2379";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Accept keepalives, elect a leader and run the callback
    Coordinator,
    /// Report to a coordinator
    Worker,
    /// Both roles on 127.0.0.1, in-memory store unless etcd is given
    Debug,
    /// Debug level logging
    Verbose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Etcd,
    Memory,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "steward")]
#[command(about = "Fleet keepalive, leader election and change callbacks")]
pub struct Cli {
    /// Comma separated list of modes
    #[arg(long, env = "STEWARD_MODE", value_enum, value_delimiter = ',', default_value = "coordinator")]
    pub mode: Vec<Mode>,

    /// Application group shared by the coordinators and their workers
    #[arg(long, env = "STEWARD_GROUP", default_value = "default")]
    pub group: String,

    #[arg(long, env = "STEWARD_STORE", value_enum)]
    pub store: Option<StoreKind>,

    /// etcd endpoints (comma-separated)
    #[arg(long, env = "STEWARD_ETCD_ENDPOINTS", value_delimiter = ',')]
    pub etcd_endpoints: Vec<String>,

    /// Role reported by this worker
    #[arg(long, env = "STEWARD_ROLE", default_value = "worker")]
    pub role: String,

    /// Identifier reported by this worker
    #[arg(long, env = "STEWARD_ID")]
    pub id: Option<String>,

    /// Address reported by this worker
    #[arg(long, env = "STEWARD_IP")]
    pub ip: Option<String>,

    /// Explicit membership key, derived from the address when absent
    #[arg(long, env = "STEWARD_KEY")]
    pub key: Option<String>,

    #[arg(long, env = "STEWARD_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// Coordinator base URL the worker reports to
    #[arg(long, env = "STEWARD_COORDINATOR")]
    pub coordinator: Option<String>,

    /// JSON file whose content is sent as the keepalive payload
    #[arg(long, env = "STEWARD_PAYLOAD_FILE")]
    pub payload_file: Option<PathBuf>,

    /// Command run by the leader when the membership changes. It gets `PODS`
    /// (JSON array), `STATE` (last persisted stdout) and `HASH`, the hex
    /// SHA-256 of `PODS`. `MD5` carries the same SHA-256 value and is not an MD5 digest.
    #[arg(long, env = "STEWARD_CALLBACK")]
    pub callback: Option<String>,

    /// Membership lease in seconds
    #[arg(long, env = "STEWARD_TTL", default_value_t = 10)]
    pub ttl: u64,

    /// Debounce window in seconds
    #[arg(long, env = "STEWARD_DAMPER", default_value_t = 5)]
    pub damper: u64,

    /// Seconds an HTTP caller waits for a script
    #[arg(long, env = "STEWARD_ACTION_TIMEOUT", default_value_t = 5)]
    pub action_timeout: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker mode requires --coordinator")]
    MissingCoordinator,

    #[error("worker mode requires --ip or --key")]
    MissingAddress,

    #[error("--group must not be empty")]
    EmptyGroup,

    #[error("--{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Leader election timings
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Lease on the lock key
    pub lock_ttl: Duration,
    /// Delay between two attempts to become leader
    pub acquire_backoff: Duration,
    /// Delay between two change detection cycles
    pub watch_interval: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            acquire_backoff: Duration::from_secs(5),
            watch_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSettings {
    Etcd { endpoints: Vec<String> },
    Memory,
}

/// What this worker reports about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub ip: Option<String>,
    pub key: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub coordinator: bool,
    pub worker: bool,
    pub verbose: bool,
    pub group: String,
    pub store: StoreSettings,
    pub identity: Identity,
    pub bind: SocketAddr,
    pub coordinator_url: Option<String>,
    pub payload_file: Option<PathBuf>,
    pub callback: Option<String>,
    pub ttl: Duration,
    pub damper: Duration,
    pub action_timeout: Duration,
    pub election: ElectionConfig,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let debug = cli.mode.contains(&Mode::Debug);
        let coordinator = debug || cli.mode.contains(&Mode::Coordinator);
        let worker = debug || cli.mode.contains(&Mode::Worker);
        let verbose = debug || cli.mode.contains(&Mode::Verbose);

        if cli.group.trim().is_empty() {
            return Err(ConfigError::EmptyGroup);
        }
        if cli.ttl == 0 {
            return Err(ConfigError::ZeroDuration("ttl"));
        }
        if cli.action_timeout == 0 {
            return Err(ConfigError::ZeroDuration("action-timeout"));
        }

        let store = match (cli.store, cli.etcd_endpoints.is_empty()) {
            (Some(StoreKind::Memory), _) => StoreSettings::Memory,
            (None, true) if debug => StoreSettings::Memory,
            (_, true) => StoreSettings::Etcd {
                endpoints: vec![DEFAULT_ETCD_ENDPOINT.to_string()],
            },
            (_, false) => StoreSettings::Etcd {
                endpoints: cli.etcd_endpoints,
            },
        };

        let ip = match cli.ip {
            Some(ip) => Some(ip),
            None if debug => Some("127.0.0.1".to_string()),
            None => None,
        };
        let coordinator_url = match cli.coordinator {
            Some(url) => Some(url.trim_end_matches('/').to_string()),
            None if debug => Some(format!("http://127.0.0.1:{}", cli.bind.port())),
            None => None,
        };
        if worker {
            if coordinator_url.is_none() {
                return Err(ConfigError::MissingCoordinator);
            }
            if ip.is_none() && cli.key.is_none() {
                return Err(ConfigError::MissingAddress);
            }
        }

        Ok(Self {
            coordinator,
            worker,
            verbose,
            group: cli.group,
            store,
            identity: Identity {
                id: cli
                    .id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                ip,
                key: cli.key,
                role: cli.role,
            },
            bind: cli.bind,
            coordinator_url,
            payload_file: cli.payload_file,
            callback: cli.callback.filter(|command| !command.trim().is_empty()),
            ttl: Duration::from_secs(cli.ttl),
            damper: Duration::from_secs(cli.damper),
            action_timeout: Duration::from_secs(cli.action_timeout),
            election: ElectionConfig::default(),
        })
    }
}
