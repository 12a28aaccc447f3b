//! Shared Store
//!
//! The coordination protocols only need a handful of single-key primitives from
//! the distributed key-value store. They are captured by the [`Store`] trait so
//! the actors can run against etcd in production and against [`MemoryStore`]
//! in tests or in local debug mode.
//!
//! Every operation is assumed to be linearizable per key.

mod etcd;
mod layout;
mod memory;

pub use etcd::{EtcdConnectConfig, EtcdStore};
pub use layout::Layout;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A single key/value pair read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub key: String,
    pub value: String,
    /// Store-assigned creation index (strictly increasing across the store)
    pub index: i64,
}

/// A TTL-bearing key created through [`Store::append`].
///
/// `index` is assigned by the store at creation time and is strictly
/// increasing, which is what leadership ordering relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedKey {
    pub key: String,
    pub index: i64,
    pub lease: i64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lease on {0} expired")]
    LeaseLost(String),

    #[error("corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Shared handle used by every actor.
pub type SharedStore = Arc<dyn Store>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Read a single key, `None` when absent or expired.
    async fn read(&self, key: &str) -> Result<Option<Node>, StoreError>;

    /// Unconditional write, optionally bound to a fresh TTL.
    async fn write(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Create-if-absent. Returns `false` if the key already exists.
    async fn create(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Write `value` only if the current value equals `expected`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError>;

    /// Create a new key under `dir` carrying a store-assigned unique index.
    async fn append(
        &self,
        dir: &str,
        prefix: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<LeasedKey, StoreError>;

    /// Extend the lease of a key created by [`Store::append`].
    ///
    /// Fails with [`StoreError::LeaseLost`] once the key has expired or was deleted.
    async fn refresh(&self, key: &LeasedKey, ttl: Duration) -> Result<(), StoreError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Recursively list every live key below `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<Node>, StoreError>;

    /// Cheap liveness probe against the backend.
    async fn status(&self) -> Result<(), StoreError>;
}

/// Normalize a directory into the prefix used for recursive listing.
pub(crate) fn dir_prefix(dir: &str) -> String {
    format!("{}/", dir.trim_end_matches('/'))
}
