//! Directed follow edge between two users.

use serde::{Deserialize, Serialize};

use super::ids::UserId;
use super::keys;
use super::ports::ItemKey;

/// One directed follow edge. Existence is binary: the edge is self-keyed by
/// (follower, following), so repeating a follow overwrites the same record
/// and unfollow is a hard delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowEdge {
    /// The user doing the following.
    pub follower_id: UserId,
    /// The user being followed.
    pub following_id: UserId,
    /// When the edge was created, epoch milliseconds.
    pub followed_at_ms: i64,
}

impl FollowEdge {
    /// The identity key this edge overwrites itself under.
    #[must_use]
    pub fn identity_key(&self) -> ItemKey {
        keys::follow_edge_key(&self.follower_id, &self.following_id)
    }
}

#[cfg(test)]
mod tests {
    //! Edge identity coverage.

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn edge_identity_is_direction_sensitive() {
        let alice = UserId::new("alice").expect("valid id");
        let bob = UserId::new("bob").expect("valid id");

        let forward = FollowEdge {
            follower_id: alice.clone(),
            following_id: bob.clone(),
            followed_at_ms: 0,
        };
        let reverse = FollowEdge {
            follower_id: bob,
            following_id: alice,
            followed_at_ms: 0,
        };

        assert_ne!(forward.identity_key(), reverse.identity_key());
    }
}
