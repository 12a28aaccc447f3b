//! Sequence Assigner
//!
//! A single integer counter per group, only ever mutated through
//! compare-and-swap. The counter is initialized to `-1` so the first value
//! handed out is `0`.

use steward_core::observability::metrics;
use steward_core::store::{Store, StoreError};
use tracing::{debug, trace};

/// Allocate the next value of the counter stored at `key`.
///
/// Lost CAS races are retried until this writer wins one.
pub async fn next_sequence(store: &dyn Store, key: &str) -> Result<i64, StoreError> {
    loop {
        let Some(node) = store.read(key).await? else {
            // another writer may initialize it first, either way the next read sees a value
            if store.create(key, "-1").await? {
                debug!(key = %key, "sequence counter initialized");
            }
            continue;
        };

        let current: i64 = node.value.trim().parse().map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("{e}"),
        })?;
        let next = current + 1;

        if store
            .compare_and_swap(key, &node.value, &next.to_string())
            .await?
        {
            trace!(key = %key, value = next, "sequence counter bumped");
            return Ok(next);
        }
        metrics::record_sequence_retry();
    }
}
