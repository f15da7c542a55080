//! Follow-graph store: directed edges between users.
//!
//! An edge is self-keyed by (follower, following), so following twice keeps
//! one record and unfollowing a non-follow is a no-op. Two secondary
//! projections expose the same edge from each end, sorted by
//! `{timestamp}#USER#{id}` so a descending scan lists newest edges first.
//! Follower and following listings materialise the referenced user profiles
//! with a bulk get rather than duplicating profile data into every edge.

use std::collections::HashMap;
use std::sync::Arc;

use mockable::Clock;
use pagination::{Cursor, Page, PageRequest};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::StoreConfig;

use super::follow::FollowEdge;
use super::ids::UserId;
use super::keys;
use super::ports::{
    Item, ItemKey, QueryIndex, QueryRequest, SecondaryIndex, SortDirection, StorageEngine,
    StorageEngineError, MAX_BATCH_GET_ITEMS,
};
use super::user::User;
use super::users;

/// Failures surfaced by the follow-graph store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FollowError {
    /// A user cannot follow themselves.
    #[error("user {user_id} cannot follow themselves")]
    SelfFollow {
        /// The offending user.
        user_id: UserId,
    },
    /// The storage engine failed.
    #[error("follow {operation} failed: {message}")]
    Upstream {
        /// The operation that failed.
        operation: &'static str,
        /// Engine failure detail.
        message: String,
    },
    /// A stored record did not deserialise.
    #[error("stored follow edge is malformed: {message}")]
    Malformed {
        /// Decoder detail.
        message: String,
    },
}

fn map_engine_error(operation: &'static str, error: StorageEngineError) -> FollowError {
    debug!(operation, %error, "follow engine operation failed");
    FollowError::Upstream {
        operation,
        message: error.to_string(),
    }
}

/// Store service for the follow graph.
#[derive(Clone)]
pub struct FollowStore {
    engine: Arc<dyn StorageEngine>,
    clock: Arc<dyn Clock>,
    default_page_size: usize,
    max_page_size: usize,
}

impl FollowStore {
    /// Create a store over the given engine and clock.
    #[must_use]
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        clock: Arc<dyn Clock>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            engine,
            clock,
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        }
    }

    /// Create a follow edge. Following the same user again overwrites the
    /// edge, refreshing its timestamp.
    ///
    /// # Errors
    /// Returns [`FollowError::SelfFollow`] when both ends are the same user
    /// and [`FollowError::Upstream`] when the engine write fails.
    pub async fn follow(
        &self,
        follower: &UserId,
        following: &UserId,
    ) -> Result<FollowEdge, FollowError> {
        if follower == following {
            return Err(FollowError::SelfFollow {
                user_id: follower.clone(),
            });
        }
        let edge = FollowEdge {
            follower_id: follower.clone(),
            following_id: following.clone(),
            followed_at_ms: self.clock.utc().timestamp_millis(),
        };
        self.engine
            .put(edge_item(&edge)?)
            .await
            .map_err(|error| map_engine_error("create", error))?;
        Ok(edge)
    }

    /// Delete a follow edge; unfollowing a non-follow is a no-op.
    ///
    /// # Errors
    /// Returns [`FollowError::Upstream`] when the engine fails.
    pub async fn unfollow(&self, follower: &UserId, following: &UserId) -> Result<(), FollowError> {
        let key = keys::follow_edge_key(follower, following);
        self.engine
            .delete(&key)
            .await
            .map_err(|error| map_engine_error("delete", error))
    }

    /// Whether `follower` follows `following`; a point get on the edge key.
    ///
    /// # Errors
    /// Returns [`FollowError::Upstream`] when the engine fails.
    pub async fn is_following(
        &self,
        follower: &UserId,
        following: &UserId,
    ) -> Result<bool, FollowError> {
        let key = keys::follow_edge_key(follower, following);
        Ok(self
            .engine
            .get(&key)
            .await
            .map_err(|error| map_engine_error("lookup", error))?
            .is_some())
    }

    /// Whether `other` follows `user`; the reverse point get.
    ///
    /// # Errors
    /// Returns [`FollowError::Upstream`] when the engine fails.
    pub async fn is_follower(&self, user: &UserId, other: &UserId) -> Result<bool, FollowError> {
        self.is_following(other, user).await
    }

    /// One page of the users following `user`, newest edge first.
    ///
    /// # Errors
    /// Returns [`FollowError::Upstream`] when the engine fails and
    /// [`FollowError::Malformed`] when a stored record does not decode.
    pub async fn get_followers(
        &self,
        user: &UserId,
        page: &PageRequest,
    ) -> Result<Page<User>, FollowError> {
        self.edge_page(
            SecondaryIndex::Gsi1,
            keys::followers_partition(user),
            page,
            |edge| edge.follower_id,
        )
        .await
    }

    /// One page of the users `user` follows, newest edge first.
    ///
    /// # Errors
    /// Returns [`FollowError::Upstream`] when the engine fails and
    /// [`FollowError::Malformed`] when a stored record does not decode.
    pub async fn get_following(
        &self,
        user: &UserId,
        page: &PageRequest,
    ) -> Result<Page<User>, FollowError> {
        self.edge_page(
            SecondaryIndex::Gsi2,
            keys::following_partition(user),
            page,
            |edge| edge.following_id,
        )
        .await
    }

    /// Count of users following `user`.
    ///
    /// # Errors
    /// Returns [`FollowError::Upstream`] when the engine fails.
    pub async fn get_follower_count(&self, user: &UserId) -> Result<u64, FollowError> {
        self.engine
            .count(QueryRequest::new(
                QueryIndex::Secondary(SecondaryIndex::Gsi1),
                keys::followers_partition(user),
            ))
            .await
            .map_err(|error| map_engine_error("follower count", error))
    }

    /// Count of users `user` follows.
    ///
    /// # Errors
    /// Returns [`FollowError::Upstream`] when the engine fails.
    pub async fn get_following_count(&self, user: &UserId) -> Result<u64, FollowError> {
        self.engine
            .count(QueryRequest::new(
                QueryIndex::Secondary(SecondaryIndex::Gsi2),
                keys::following_partition(user),
            ))
            .await
            .map_err(|error| map_engine_error("following count", error))
    }

    /// Scan one edge index, then bulk-get the referenced profiles and
    /// reassemble them in edge order. Edges whose profile no longer exists
    /// are dropped from the page rather than failing it.
    async fn edge_page(
        &self,
        index: SecondaryIndex,
        partition: String,
        page: &PageRequest,
        counterpart: impl Fn(FollowEdge) -> UserId,
    ) -> Result<Page<User>, FollowError> {
        let limit = page.resolve_limit(self.default_page_size, self.max_page_size);
        let start_key = page.cursor.clone().map(Cursor::into_position);
        let result = self
            .engine
            .query(
                QueryRequest::new(QueryIndex::Secondary(index), partition)
                    .direction(SortDirection::Descending)
                    .limit(limit)
                    .start_after(start_key),
            )
            .await
            .map_err(|error| map_engine_error("edge scan", error))?;

        let mut ordered = Vec::with_capacity(result.items.len());
        for item in result.items {
            ordered.push(counterpart(edge_from_item(item)?));
        }
        let profiles = self.bulk_get_users(&ordered).await?;
        let items = ordered
            .into_iter()
            .filter_map(|id| profiles.get(&id).cloned())
            .collect();
        Ok(Page {
            items,
            next_cursor: result.last_key.map(Cursor::from_position),
        })
    }

    /// Bulk-get profiles by id, chunked at the engine's batch-get limit.
    async fn bulk_get_users(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, User>, FollowError> {
        let mut profiles = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_BATCH_GET_ITEMS) {
            let keys: Vec<ItemKey> = chunk.iter().map(keys::user_key).collect();
            let items = self
                .engine
                .batch_get(keys)
                .await
                .map_err(|error| map_engine_error("profile fetch", error))?;
            for item in items {
                let user = users::record_from_item(item).map_err(|error| {
                    FollowError::Malformed {
                        message: error.to_string(),
                    }
                })?;
                profiles.insert(user.id.clone(), user);
            }
        }
        Ok(profiles)
    }
}

/// Serialise an edge into an engine item with both directional projections.
fn edge_item(edge: &FollowEdge) -> Result<Item, FollowError> {
    let value = serde_json::to_value(edge).map_err(|error| FollowError::Malformed {
        message: error.to_string(),
    })?;
    let Value::Object(mut item) = value else {
        return Err(FollowError::Malformed {
            message: "follow edge did not serialise to an object".to_owned(),
        });
    };

    let key = edge.identity_key();
    item.insert("pk".to_owned(), Value::String(key.partition));
    item.insert("sk".to_owned(), Value::String(key.sort));
    item.insert(
        "gsi1pk".to_owned(),
        Value::String(keys::followers_partition(&edge.following_id)),
    );
    item.insert(
        "gsi1sk".to_owned(),
        Value::String(keys::follow_time_sort_key(
            edge.followed_at_ms,
            &edge.follower_id,
        )),
    );
    item.insert(
        "gsi2pk".to_owned(),
        Value::String(keys::following_partition(&edge.follower_id)),
    );
    item.insert(
        "gsi2sk".to_owned(),
        Value::String(keys::follow_time_sort_key(
            edge.followed_at_ms,
            &edge.following_id,
        )),
    );
    Ok(item)
}

fn edge_from_item(item: Item) -> Result<FollowEdge, FollowError> {
    serde_json::from_value(Value::Object(item)).map_err(|error| FollowError::Malformed {
        message: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    //! Follow/unfollow symmetry and listing materialisation.

    use rstest::{fixture, rstest};

    use crate::domain::users::UserStore;
    use crate::outbound::memory::MemoryStorageEngine;
    use crate::test_support::{fixture_now, MutableClock};

    use super::*;

    struct Fixture {
        store: FollowStore,
        users: UserStore,
        clock: Arc<MutableClock>,
    }

    #[fixture]
    fn fx() -> Fixture {
        let engine = Arc::new(MemoryStorageEngine::new());
        let clock = Arc::new(MutableClock::new(fixture_now()));
        Fixture {
            store: FollowStore::new(engine.clone(), clock.clone(), &StoreConfig::default()),
            users: UserStore::new(engine, clock.clone()),
            clock,
        }
    }

    async fn seed_user(fx: &Fixture, id: &str) -> UserId {
        let user = User {
            id: UserId::new(id).expect("valid id"),
            email: Some(format!("{id}@example.com")),
            username: Some(id.to_owned()),
            name: None,
            avatar_path: None,
            created_at_ms: fixture_now().timestamp_millis(),
            updated_at_ms: None,
        };
        fx.users.create_user(user).await.expect("seed user").id
    }

    #[rstest]
    #[tokio::test]
    async fn follow_and_unfollow_are_symmetric(fx: Fixture) {
        let alice = seed_user(&fx, "alice").await;
        let bob = seed_user(&fx, "bob").await;

        assert_eq!(
            fx.store
                .get_follower_count(&bob)
                .await
                .expect("initial count"),
            0
        );

        fx.store.follow(&alice, &bob).await.expect("follow");
        assert!(fx.store.is_following(&alice, &bob).await.expect("lookup"));
        assert!(fx.store.is_follower(&bob, &alice).await.expect("lookup"));
        assert!(!fx.store.is_following(&bob, &alice).await.expect("lookup"));
        assert_eq!(
            fx.store.get_follower_count(&bob).await.expect("count"),
            1
        );

        fx.store.unfollow(&alice, &bob).await.expect("unfollow");
        assert!(!fx.store.is_following(&alice, &bob).await.expect("lookup"));
        assert_eq!(
            fx.store.get_follower_count(&bob).await.expect("count"),
            0
        );

        // Unfollowing a non-follow is a no-op, not an error.
        fx.store.unfollow(&alice, &bob).await.expect("repeat unfollow");
    }

    #[rstest]
    #[tokio::test]
    async fn repeated_follow_keeps_one_edge(fx: Fixture) {
        let alice = seed_user(&fx, "alice").await;
        let bob = seed_user(&fx, "bob").await;

        fx.store.follow(&alice, &bob).await.expect("first follow");
        fx.clock.advance_seconds(60);
        fx.store.follow(&alice, &bob).await.expect("second follow");

        assert_eq!(
            fx.store.get_follower_count(&bob).await.expect("count"),
            1
        );
    }

    #[rstest]
    #[tokio::test]
    async fn self_follow_is_rejected(fx: Fixture) {
        let alice = seed_user(&fx, "alice").await;
        let error = fx
            .store
            .follow(&alice, &alice)
            .await
            .expect_err("self follow rejected");
        assert!(matches!(error, FollowError::SelfFollow { .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn followers_materialise_profiles_newest_first(fx: Fixture) {
        let target = seed_user(&fx, "target").await;
        for id in ["alice", "bob", "carol"] {
            let follower = seed_user(&fx, id).await;
            fx.store.follow(&follower, &target).await.expect("follow");
            fx.clock.advance_seconds(60);
        }

        let page = fx
            .store
            .get_followers(&target, &PageRequest::default())
            .await
            .expect("followers page");
        let ids: Vec<&str> = page.items.iter().map(|user| user.id.as_str()).collect();
        assert_eq!(ids, vec!["carol", "bob", "alice"]);
        assert!(page.is_last());
    }

    #[rstest]
    #[tokio::test]
    async fn following_pages_round_trip(fx: Fixture) {
        let alice = seed_user(&fx, "alice").await;
        for id in ["u1", "u2", "u3", "u4", "u5"] {
            let target = seed_user(&fx, id).await;
            fx.store.follow(&alice, &target).await.expect("follow");
            fx.clock.advance_seconds(60);
        }

        let mut seen = Vec::new();
        let mut request = PageRequest::with_limit(2);
        loop {
            let page = fx
                .store
                .get_following(&alice, &request)
                .await
                .expect("page");
            seen.extend(page.items.into_iter().map(|user| user.id.as_str().to_owned()));
            match page.next_cursor {
                Some(cursor) => request = PageRequest::after(cursor, Some(2)),
                None => break,
            }
        }
        assert_eq!(seen, vec!["u5", "u4", "u3", "u2", "u1"]);
    }

    #[rstest]
    #[tokio::test]
    async fn edges_without_a_profile_are_dropped_from_the_page(fx: Fixture) {
        let target = seed_user(&fx, "target").await;
        let alice = seed_user(&fx, "alice").await;
        let ghost = UserId::new("ghost").expect("valid id");

        fx.store.follow(&alice, &target).await.expect("follow");
        fx.store.follow(&ghost, &target).await.expect("ghost follow");

        let page = fx
            .store
            .get_followers(&target, &PageRequest::default())
            .await
            .expect("followers page");
        let ids: Vec<&str> = page.items.iter().map(|user| user.id.as_str()).collect();
        assert_eq!(ids, vec!["alice"]);
        // The edge itself still counts.
        assert_eq!(
            fx.store.get_follower_count(&target).await.expect("count"),
            2
        );
    }
}
