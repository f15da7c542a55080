//! Batch executor: dedup, chunking and concurrent flush of bulk writes.
//!
//! The engine accepts at most [`MAX_BATCH_WRITE_ITEMS`] operations per batch
//! request and rejects batches containing two operations on the same key.
//! The executor deduplicates by composite identity key (the last operation
//! for a key wins, matching the last-write-wins semantics callers expect
//! when building idempotent batches from overlapping inputs), splits the
//! rest into chunks and flushes all chunks concurrently.
//!
//! Failure semantics are all-or-nothing per chunk, not per call: when one
//! chunk fails the whole call fails, but chunks that already committed stay
//! committed. Callers tolerate this as at-least-once behaviour — every write
//! here overwrites by identity key, so replaying a failed call is safe.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::try_join_all;
use tracing::debug;

use super::ports::{
    item_key_of, ItemKey, MAX_BATCH_WRITE_ITEMS, StorageEngine, StorageEngineError, WriteRequest,
};

/// Splits bulk put/delete sets into engine-sized batch requests.
#[derive(Clone)]
pub struct BatchExecutor {
    engine: Arc<dyn StorageEngine>,
}

impl BatchExecutor {
    /// Create an executor over the given engine handle.
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// Apply all operations: dedupe by identity key, chunk at the engine
    /// limit and flush the chunks concurrently. An empty input performs no
    /// engine calls.
    ///
    /// # Errors
    /// Returns the first [`StorageEngineError`] any chunk produced; other
    /// chunks may already have committed.
    pub async fn execute(&self, operations: Vec<WriteRequest>) -> Result<(), StorageEngineError> {
        if operations.is_empty() {
            return Ok(());
        }

        let deduped = dedupe_last_wins(operations)?;
        let chunks = chunk(deduped, MAX_BATCH_WRITE_ITEMS);
        debug!(chunks = chunks.len(), "flushing batch write");

        try_join_all(
            chunks
                .into_iter()
                .map(|batch| self.engine.batch_write(batch)),
        )
        .await?;
        Ok(())
    }
}

/// Identity key of one batch operation.
fn identity_key(request: &WriteRequest) -> Result<ItemKey, StorageEngineError> {
    match request {
        WriteRequest::Put(item) => item_key_of(item),
        WriteRequest::Delete(key) => Ok(key.clone()),
    }
}

/// Collapse operations sharing an identity key, keeping the last one. The
/// first-seen order of keys is preserved so chunk contents stay
/// deterministic.
fn dedupe_last_wins(
    operations: Vec<WriteRequest>,
) -> Result<Vec<WriteRequest>, StorageEngineError> {
    let mut order: Vec<ItemKey> = Vec::new();
    let mut latest: HashMap<ItemKey, WriteRequest> = HashMap::new();

    for operation in operations {
        let key = identity_key(&operation)?;
        if !latest.contains_key(&key) {
            order.push(key.clone());
        }
        latest.insert(key, operation);
    }

    Ok(order
        .into_iter()
        .filter_map(|key| latest.remove(&key))
        .collect())
}

fn chunk(operations: Vec<WriteRequest>, size: usize) -> Vec<Vec<WriteRequest>> {
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(size.min(operations.len()));
    for operation in operations {
        current.push(operation);
        if current.len() == size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
