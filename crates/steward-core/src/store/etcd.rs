//! Etcd Store
//!
//! Maps the [`Store`] primitives onto etcd v3. TTLs become leases, create-if-absent
//! and compare-and-swap become single-comparison transactions, and the
//! append index is the creation revision of the new key.

use super::{dir_prefix, LeasedKey, Node, Store, StoreError};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{
    Client, Compare, CompareOp, GetOptions, KeyValue, PutOptions, Txn, TxnOp,
};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Connection retry settings
#[derive(Debug, Clone)]
pub struct EtcdConnectConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for EtcdConnectConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to etcd with exponential backoff
    pub async fn connect(
        endpoints: &[String],
        config: &EtcdConnectConfig,
    ) -> Result<Self, StoreError> {
        let backoff = ExponentialBackoff {
            initial_interval: config.initial_interval,
            max_interval: config.max_interval,
            max_elapsed_time: Some(config.max_elapsed),
            ..Default::default()
        };

        let client = retry(backoff, || async {
            match Client::connect(endpoints, None).await {
                Ok(client) => {
                    debug!(endpoints = ?endpoints, "Connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await?;

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    async fn grant(&self, ttl: Duration) -> Result<i64, StoreError> {
        // etcd leases have whole-second granularity
        let secs = ttl.as_secs().max(1) as i64;
        let lease = self.client.clone().lease_grant(secs, None).await?;
        trace!(lease_id = lease.id(), ttl = secs, "Lease granted");
        Ok(lease.id())
    }
}

fn to_node(kv: &KeyValue) -> Result<Node, StoreError> {
    Ok(Node {
        key: kv.key_str()?.to_string(),
        value: kv.value_str()?.to_string(),
        index: kv.create_revision(),
    })
}

#[async_trait]
impl Store for EtcdStore {
    async fn read(&self, key: &str) -> Result<Option<Node>, StoreError> {
        let resp = self.client.clone().get(key, None).await?;
        resp.kvs().first().map(to_node).transpose()
    }

    async fn write(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let options = match ttl {
            Some(ttl) => Some(PutOptions::new().with_lease(self.grant(ttl).await?)),
            None => None,
        };
        self.client.clone().put(key, value, options).await?;
        Ok(())
    }

    async fn create(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let txn = Txn::new()
            .when([Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then([TxnOp::put(key, value, None)]);
        let resp = self.client.clone().txn(txn).await?;
        Ok(resp.succeeded())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let txn = Txn::new()
            .when([Compare::value(key, CompareOp::Equal, expected)])
            .and_then([TxnOp::put(key, value, None)]);
        let resp = self.client.clone().txn(txn).await?;
        Ok(resp.succeeded())
    }

    async fn append(
        &self,
        dir: &str,
        prefix: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<LeasedKey, StoreError> {
        let lease = self.grant(ttl).await?;
        // lease ids are cluster-unique, so the key never collides
        let key = format!("{}{}{:016x}", dir_prefix(dir), prefix, lease);
        let txn = Txn::new()
            .when([Compare::create_revision(key.as_str(), CompareOp::Equal, 0)])
            .and_then([TxnOp::put(
                key.as_str(),
                value,
                Some(PutOptions::new().with_lease(lease)),
            )]);
        let resp = self.client.clone().txn(txn).await?;
        if !resp.succeeded() {
            return Err(StoreError::Unavailable(format!("{key} already exists")));
        }
        let index = resp
            .header()
            .map(|header| header.revision())
            .ok_or_else(|| StoreError::Unavailable("txn response without header".into()))?;
        Ok(LeasedKey { key, index, lease })
    }

    async fn refresh(&self, key: &LeasedKey, _ttl: Duration) -> Result<(), StoreError> {
        // the TTL of an etcd lease is fixed when it is granted
        let mut client = self.client.clone();
        let (_keeper, mut stream) = client.lease_keep_alive(key.lease).await?;
        match stream.message().await? {
            Some(resp) if resp.ttl() > 0 => {
                trace!(lease_id = key.lease, ttl = resp.ttl(), "Keep-alive OK");
            }
            _ => return Err(StoreError::LeaseLost(key.key.clone())),
        }

        // the lease may outlive a key that was explicitly deleted
        let resp = client
            .get(key.key.as_str(), Some(GetOptions::new().with_count_only()))
            .await?;
        if resp.count() == 0 {
            return Err(StoreError::LeaseLost(key.key.clone()));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client.clone().delete(key, None).await?;
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<Node>, StoreError> {
        let resp = self
            .client
            .clone()
            .get(dir_prefix(dir), Some(GetOptions::new().with_prefix()))
            .await?;
        resp.kvs().iter().map(to_node).collect()
    }

    async fn status(&self) -> Result<(), StoreError> {
        self.client.clone().status().await?;
        Ok(())
    }
}
