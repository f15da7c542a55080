//! User store: profile lookups and optimistically concurrent updates.
//!
//! Profiles carry an `updated_at_ms` watermark. Every update is a
//! conditional write asserting the watermark still holds the value the
//! caller last read (or is absent, before the first update); a mismatch is
//! surfaced as [`UserError::ConcurrentModification`] and the caller must
//! re-read and retry. Email and username uniqueness is a read-before-write
//! existence check against the normalised-value indexes, not an atomic
//! reservation.

use std::sync::Arc;

use mockable::Clock;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::ids::UserId;
use super::keys;
use super::ports::{
    Item, Precondition, QueryIndex, QueryRequest, SecondaryIndex, StorageEngine,
    StorageEngineError,
};
use super::user::{User, UserPatch};

/// Attribute carrying the optimistic-concurrency watermark.
const WATERMARK_ATTRIBUTE: &str = "updated_at_ms";

/// Failures surfaced by the user store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    /// Another profile already owns the requested email.
    #[error("email address is already taken")]
    EmailAlreadyTaken,
    /// Another profile already owns the requested username.
    #[error("username is already taken")]
    UsernameAlreadyTaken,
    /// The stored watermark no longer matches the caller's read.
    #[error("profile of user {user_id} was modified concurrently")]
    ConcurrentModification {
        /// The contended profile.
        user_id: UserId,
    },
    /// A profile already exists under the identifier being created.
    #[error("user {user_id} already exists")]
    AlreadyExists {
        /// The taken identifier.
        user_id: UserId,
    },
    /// The storage engine failed.
    #[error("user {operation} failed: {message}")]
    Upstream {
        /// The operation that failed.
        operation: &'static str,
        /// Engine failure detail.
        message: String,
    },
    /// A stored record did not deserialise.
    #[error("stored user profile is malformed: {message}")]
    Malformed {
        /// Decoder detail.
        message: String,
    },
}

fn map_engine_error(operation: &'static str, error: StorageEngineError) -> UserError {
    debug!(operation, %error, "user engine operation failed");
    UserError::Upstream {
        operation,
        message: error.to_string(),
    }
}

/// Store service for user profiles.
#[derive(Clone)]
pub struct UserStore {
    engine: Arc<dyn StorageEngine>,
    clock: Arc<dyn Clock>,
}

impl UserStore {
    /// Create a store over the given engine and clock.
    #[must_use]
    pub fn new(engine: Arc<dyn StorageEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }

    /// Create a profile. Fails when the identifier is already taken; a
    /// profile is created exactly once and never silently overwritten.
    ///
    /// # Errors
    /// Returns [`UserError::AlreadyExists`] when the identifier is taken and
    /// [`UserError::Upstream`] when the engine fails.
    pub async fn create_user(&self, user: User) -> Result<User, UserError> {
        let item = user_item(&user)?;
        self.engine
            .put_conditional(item, Precondition::AttributeMissing("pk".to_owned()))
            .await
            .map_err(|error| match error {
                StorageEngineError::ConditionFailed { .. } => UserError::AlreadyExists {
                    user_id: user.id.clone(),
                },
                other => map_engine_error("create", other),
            })?;
        Ok(user)
    }

    /// Point lookup by identifier; absence is an expected outcome, not an
    /// error.
    ///
    /// # Errors
    /// Returns [`UserError::Upstream`] when the engine fails and
    /// [`UserError::Malformed`] when the stored record does not decode.
    pub async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, UserError> {
        let key = keys::user_key(user_id);
        self.engine
            .get(&key)
            .await
            .map_err(|error| map_engine_error("lookup", error))?
            .map(record_from_item)
            .transpose()
    }

    /// Lookup by normalised email via the email index.
    ///
    /// # Errors
    /// Returns [`UserError::Upstream`] when the engine fails and
    /// [`UserError::Malformed`] when the stored record does not decode.
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, UserError> {
        self.lookup_by_index(SecondaryIndex::Gsi1, keys::email_partition(email))
            .await
    }

    /// Lookup by normalised username via the username index.
    ///
    /// # Errors
    /// Returns [`UserError::Upstream`] when the engine fails and
    /// [`UserError::Malformed`] when the stored record does not decode.
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, UserError> {
        self.lookup_by_index(SecondaryIndex::Gsi2, keys::username_partition(username))
            .await
    }

    /// Apply a patch to the profile the caller last read.
    ///
    /// Uniqueness of a changed email or username is checked first; the
    /// write then asserts the stored watermark still matches
    /// `current.updated_at_ms`. Losers of a concurrent update receive
    /// [`UserError::ConcurrentModification`] and must re-read before
    /// retrying.
    ///
    /// # Errors
    /// Returns [`UserError::EmailAlreadyTaken`] or
    /// [`UserError::UsernameAlreadyTaken`] on a uniqueness violation,
    /// [`UserError::ConcurrentModification`] on a watermark mismatch and
    /// [`UserError::Upstream`] when the engine fails.
    pub async fn update_user(&self, current: &User, patch: UserPatch) -> Result<User, UserError> {
        if let Some(email) = &patch.email {
            let taken = self
                .get_user_by_email(email)
                .await?
                .is_some_and(|owner| owner.id != current.id);
            if taken {
                return Err(UserError::EmailAlreadyTaken);
            }
        }
        if let Some(username) = &patch.username {
            let taken = self
                .get_user_by_username(username)
                .await?
                .is_some_and(|owner| owner.id != current.id);
            if taken {
                return Err(UserError::UsernameAlreadyTaken);
            }
        }

        let mut updated = current.clone();
        patch.apply_to(&mut updated);
        updated.updated_at_ms = Some(self.clock.utc().timestamp_millis());

        let condition = match current.updated_at_ms {
            Some(watermark) => Precondition::AttributeEquals(
                WATERMARK_ATTRIBUTE.to_owned(),
                Value::from(watermark),
            ),
            None => Precondition::AttributeMissing(WATERMARK_ATTRIBUTE.to_owned()),
        };
        self.engine
            .put_conditional(user_item(&updated)?, condition)
            .await
            .map_err(|error| match error {
                StorageEngineError::ConditionFailed { .. } => {
                    debug!(user = %current.id, "user update lost an optimistic race");
                    UserError::ConcurrentModification {
                        user_id: current.id.clone(),
                    }
                }
                other => map_engine_error("update", other),
            })?;
        Ok(updated)
    }

    async fn lookup_by_index(
        &self,
        index: SecondaryIndex,
        partition: String,
    ) -> Result<Option<User>, UserError> {
        let page = self
            .engine
            .query(QueryRequest::new(QueryIndex::Secondary(index), partition).limit(1))
            .await
            .map_err(|error| map_engine_error("index lookup", error))?;
        page.items.into_iter().next().map(record_from_item).transpose()
    }
}

/// Serialise a profile into an engine item with its key projections.
pub(crate) fn user_item(record: &User) -> Result<Item, UserError> {
    let value = serde_json::to_value(record).map_err(|error| UserError::Malformed {
        message: error.to_string(),
    })?;
    let Value::Object(mut item) = value else {
        return Err(UserError::Malformed {
            message: "user profile did not serialise to an object".to_owned(),
        });
    };

    let key = record.identity_key();
    item.insert("sk".to_owned(), Value::String(key.sort));
    if let Some(email) = record.normalised_email() {
        item.insert("gsi1pk".to_owned(), Value::String(keys::email_partition(&email)));
        item.insert("gsi1sk".to_owned(), Value::String(key.partition.clone()));
    }
    if let Some(username) = record.normalised_username() {
        item.insert(
            "gsi2pk".to_owned(),
            Value::String(keys::username_partition(&username)),
        );
        item.insert("gsi2sk".to_owned(), Value::String(key.partition.clone()));
    }
    item.insert("pk".to_owned(), Value::String(key.partition));
    Ok(item)
}

pub(crate) fn record_from_item(item: Item) -> Result<User, UserError> {
    serde_json::from_value(Value::Object(item)).map_err(|error| UserError::Malformed {
        message: error.to_string(),
    })
}
