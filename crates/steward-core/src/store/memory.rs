//! In-process store
//!
//! Implements the [`Store`] contract over a single mutex, so every operation is
//! trivially linearizable. Expiry is evaluated lazily against
//! `tokio::time::Instant`, which lets tests drive leases with paused time.

use super::{dir_prefix, LeasedKey, Node, Store, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: String,
    index: i64,
    lease: Option<Lease>,
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    id: i64,
    expires: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    revision: i64,
}

impl Inner {
    fn purge(&mut self, now: Instant) {
        self.entries
            .retain(|_, entry| entry.lease.map_or(true, |lease| lease.expires > now));
    }

    fn bump(&mut self) -> i64 {
        self.revision += 1;
        self.revision
    }

    fn put(&mut self, key: &str, value: &str, lease: Option<Lease>) -> i64 {
        let revision = self.bump();
        let index = self
            .entries
            .get(key)
            .map(|entry| entry.index)
            .unwrap_or(revision);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                index,
                lease,
            },
        );
        index
    }
}

/// Linearizable in-memory implementation of [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Node>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.purge(Instant::now());
        Ok(inner.entries.get(key).map(|entry| Node {
            key: key.to_string(),
            value: entry.value.clone(),
            index: entry.index,
        }))
    }

    async fn write(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.purge(now);
        let lease = match ttl {
            Some(ttl) => Some(Lease {
                id: inner.bump(),
                expires: now + ttl,
            }),
            None => None,
        };
        inner.put(key, value, lease);
        Ok(())
    }

    async fn create(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.purge(Instant::now());
        if inner.entries.contains_key(key) {
            return Ok(false);
        }
        inner.put(key, value, None);
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.purge(Instant::now());
        let (matches, lease) = match inner.entries.get(key) {
            Some(entry) => (entry.value == expected, entry.lease),
            None => (false, None),
        };
        if matches {
            inner.put(key, value, lease);
        }
        Ok(matches)
    }

    async fn append(
        &self,
        dir: &str,
        prefix: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<LeasedKey, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.purge(now);
        let index = inner.bump();
        // zero padding keeps lexical and numeric order identical
        let key = format!("{}{}{:020}", dir_prefix(dir), prefix, index);
        inner.entries.insert(
            key.clone(),
            Entry {
                value: value.to_string(),
                index,
                lease: Some(Lease {
                    id: index,
                    expires: now + ttl,
                }),
            },
        );
        Ok(LeasedKey {
            key,
            index,
            lease: index,
        })
    }

    async fn refresh(&self, key: &LeasedKey, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.purge(now);
        match inner.entries.get_mut(&key.key) {
            Some(Entry {
                lease: Some(lease), ..
            }) if lease.id == key.lease => {
                lease.expires = now + ttl;
                Ok(())
            }
            _ => Err(StoreError::LeaseLost(key.key.clone())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.entries.remove(key).is_some() {
            inner.bump();
        }
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<Node>, StoreError> {
        let prefix = dir_prefix(dir);
        let mut inner = self.inner.lock().await;
        inner.purge(Instant::now());
        Ok(inner
            .entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, entry)| Node {
                key: key.clone(),
                value: entry.value.clone(),
                index: entry.index,
            })
            .collect())
    }

    async fn status(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_if_absent() {
        let store = MemoryStore::new();
        assert!(store.create("/a/seq", "-1").await.unwrap());
        assert!(!store.create("/a/seq", "7").await.unwrap());
        assert_eq!(store.read("/a/seq").await.unwrap().unwrap().value, "-1");
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();
        store.write("/a/seq", "3", None).await.unwrap();
        assert!(!store.compare_and_swap("/a/seq", "2", "3").await.unwrap());
        assert!(store.compare_and_swap("/a/seq", "3", "4").await.unwrap());
        assert_eq!(store.read("/a/seq").await.unwrap().unwrap().value, "4");
        assert!(!store.compare_and_swap("/a/missing", "0", "1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .write("/a/pods/x", "{}", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.read("/a/pods/x").await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.read("/a/pods/x").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_is_ordered_and_refreshable() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);
        let first = store.append("/a/locks", "leader-", "", ttl).await.unwrap();
        let second = store.append("/a/locks", "leader-", "", ttl).await.unwrap();
        assert!(second.index > first.index);
        assert!(second.key > first.key);

        tokio::time::advance(Duration::from_secs(8)).await;
        store.refresh(&first, ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        // first was refreshed, second expired
        assert!(store.refresh(&first, ttl).await.is_ok());
        assert!(matches!(
            store.refresh(&second, ttl).await,
            Err(StoreError::LeaseLost(_))
        ));
        let listed = store.list("/a/locks").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, first.key);
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_directory() {
        let store = MemoryStore::new();
        store.write("/a/pods/1", "x", None).await.unwrap();
        store.write("/a/pods/2", "y", None).await.unwrap();
        store.write("/a/podsx", "z", None).await.unwrap();
        store.write("/b/pods/1", "w", None).await.unwrap();
        let keys: Vec<_> = store
            .list("/a/pods")
            .await
            .unwrap()
            .into_iter()
            .map(|node| node.key)
            .collect();
        assert_eq!(keys, vec!["/a/pods/1", "/a/pods/2"]);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_creation_index() {
        let store = MemoryStore::new();
        store.write("/a/k", "1", None).await.unwrap();
        let index = store.read("/a/k").await.unwrap().unwrap().index;
        store.write("/a/k", "2", None).await.unwrap();
        assert_eq!(store.read("/a/k").await.unwrap().unwrap().index, index);
    }

    #[tokio::test]
    async fn test_refresh_after_delete_is_lease_lost() {
        let store = MemoryStore::new();
        let key = store
            .append("/a/locks", "leader-", "", Duration::from_secs(10))
            .await
            .unwrap();
        store.delete(&key.key).await.unwrap();
        assert!(store.refresh(&key, Duration::from_secs(10)).await.is_err());
    }
}
