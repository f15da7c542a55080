//! Read-through cache store for expensive metadata lookups.
//!
//! Entries are plain keyed records carrying an arbitrary JSON payload and
//! an expiry deadline. The engine's TTL purge removes expired records
//! eventually; reads check the deadline explicitly and treat a past-deadline
//! record as a miss. Engine failures are hard errors, never silently
//! reported as misses.

use std::sync::Arc;

use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::keys;
use super::ports::{Item, StorageEngine, StorageEngineError};

/// Failures surfaced by the cache store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The storage engine failed.
    #[error("cache {operation} failed: {message}")]
    Upstream {
        /// The operation that failed.
        operation: &'static str,
        /// Engine failure detail.
        message: String,
    },
    /// A stored record did not deserialise.
    #[error("stored cache entry is malformed: {message}")]
    Malformed {
        /// Decoder detail.
        message: String,
    },
}

fn map_engine_error(operation: &'static str, error: StorageEngineError) -> CacheError {
    debug!(operation, %error, "cache engine operation failed");
    CacheError::Upstream {
        operation,
        message: error.to_string(),
    }
}

/// One cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    value: Value,
    expires_at_ms: i64,
}

/// Store service for cached lookups.
#[derive(Clone)]
pub struct CacheStore {
    engine: Arc<dyn StorageEngine>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Create a store over the given engine and clock.
    #[must_use]
    pub fn new(engine: Arc<dyn StorageEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }

    /// Cache a value under a key for `ttl_ms`, overwriting any previous
    /// entry.
    ///
    /// # Errors
    /// Returns [`CacheError::Upstream`] when the engine write fails.
    pub async fn put_cached(
        &self,
        key: &str,
        value: Value,
        ttl_ms: i64,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: key.to_owned(),
            value,
            expires_at_ms: self.clock.utc().timestamp_millis().saturating_add(ttl_ms),
        };
        self.engine
            .put(cache_item(&entry)?)
            .await
            .map_err(|error| map_engine_error("write", error))
    }

    /// Fetch a cached value; absent and expired entries both read as `None`.
    ///
    /// # Errors
    /// Returns [`CacheError::Upstream`] when the engine fails and
    /// [`CacheError::Malformed`] when the stored record does not decode.
    /// Engine failures are never reported as misses.
    pub async fn get_cached(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let item_key = keys::cache_key(key);
        let Some(item) = self
            .engine
            .get(&item_key)
            .await
            .map_err(|error| map_engine_error("read", error))?
        else {
            return Ok(None);
        };
        let entry = entry_from_item(item)?;
        if entry.expires_at_ms <= self.clock.utc().timestamp_millis() {
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    /// Drop a cached entry; dropping an absent entry is a no-op.
    ///
    /// # Errors
    /// Returns [`CacheError::Upstream`] when the engine fails.
    pub async fn remove_cached(&self, key: &str) -> Result<(), CacheError> {
        let item_key = keys::cache_key(key);
        self.engine
            .delete(&item_key)
            .await
            .map_err(|error| map_engine_error("remove", error))
    }
}

fn cache_item(entry: &CacheEntry) -> Result<Item, CacheError> {
    let value = serde_json::to_value(entry).map_err(|error| CacheError::Malformed {
        message: error.to_string(),
    })?;
    let Value::Object(mut item) = value else {
        return Err(CacheError::Malformed {
            message: "cache entry did not serialise to an object".to_owned(),
        });
    };
    let key = keys::cache_key(&entry.key);
    item.insert("pk".to_owned(), Value::String(key.partition));
    item.insert("sk".to_owned(), Value::String(key.sort));
    Ok(item)
}

fn entry_from_item(item: Item) -> Result<CacheEntry, CacheError> {
    serde_json::from_value(Value::Object(item)).map_err(|error| CacheError::Malformed {
        message: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    //! Hit, miss and expiry behaviour.

    use rstest::{fixture, rstest};
    use serde_json::json;

    use crate::outbound::memory::MemoryStorageEngine;
    use crate::test_support::{fixture_now, MutableClock};

    use super::*;

    struct Fixture {
        store: CacheStore,
        clock: Arc<MutableClock>,
    }

    #[fixture]
    fn fx() -> Fixture {
        let clock = Arc::new(MutableClock::new(fixture_now()));
        Fixture {
            store: CacheStore::new(Arc::new(MemoryStorageEngine::new()), clock.clone()),
            clock,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn cached_value_round_trips_until_expiry(fx: Fixture) {
        let payload = json!({"title": "Dark", "seasons": 3});
        fx.store
            .put_cached("series:1399", payload.clone(), 60_000)
            .await
            .expect("write");

        assert_eq!(
            fx.store.get_cached("series:1399").await.expect("read"),
            Some(payload)
        );

        fx.clock.advance_seconds(60);
        assert_eq!(
            fx.store.get_cached("series:1399").await.expect("read"),
            None
        );
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_key_is_a_miss(fx: Fixture) {
        assert_eq!(fx.store.get_cached("series:404").await.expect("read"), None);
    }

    #[rstest]
    #[tokio::test]
    async fn overwrite_replaces_payload_and_deadline(fx: Fixture) {
        fx.store
            .put_cached("k", json!(1), 1_000)
            .await
            .expect("first write");
        fx.clock.advance_seconds(30);
        fx.store
            .put_cached("k", json!(2), 60_000)
            .await
            .expect("second write");

        fx.clock.advance_seconds(30);
        assert_eq!(fx.store.get_cached("k").await.expect("read"), Some(json!(2)));
    }

    #[rstest]
    #[tokio::test]
    async fn remove_is_idempotent(fx: Fixture) {
        fx.store
            .put_cached("k", json!(1), 60_000)
            .await
            .expect("write");
        fx.store.remove_cached("k").await.expect("remove");
        fx.store.remove_cached("k").await.expect("repeat remove");
        assert_eq!(fx.store.get_cached("k").await.expect("read"), None);
    }
}
