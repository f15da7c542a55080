//! Session store: login sessions and their provider-link mutations.
//!
//! Sessions are keyed by their identifier and projected onto gsi1 under the
//! owning user, so "all sessions of a user" is one index query over fully
//! projected items. The engine's TTL purge handles physical deletion of
//! expired records eventually; reads here treat an unexpired-but-past-
//! deadline record as absent rather than trusting the purge.

use std::sync::Arc;

use mockable::Clock;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::batch::BatchExecutor;
use super::ids::{SessionId, UserId};
use super::keys;
use super::ports::{
    Item, QueryIndex, QueryRequest, SecondaryIndex, StorageEngine, StorageEngineError,
    WriteRequest,
};
use super::session::{ExternalProviderLink, Session};

/// Failures surfaced by the session store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A mutation targeted a session that does not exist or has expired.
    #[error("session {session_id} does not exist or has expired")]
    MissingSession {
        /// The targeted session.
        session_id: SessionId,
    },
    /// The storage engine failed.
    #[error("session {operation} failed: {message}")]
    Upstream {
        /// The operation that failed.
        operation: &'static str,
        /// Engine failure detail.
        message: String,
    },
    /// A stored record did not deserialise.
    #[error("stored session is malformed: {message}")]
    Malformed {
        /// Decoder detail.
        message: String,
    },
}

fn map_engine_error(operation: &'static str, error: StorageEngineError) -> SessionError {
    debug!(operation, %error, "session engine operation failed");
    SessionError::Upstream {
        operation,
        message: error.to_string(),
    }
}

/// Store service for login sessions.
#[derive(Clone)]
pub struct SessionStore {
    engine: Arc<dyn StorageEngine>,
    clock: Arc<dyn Clock>,
    batch: BatchExecutor,
}

impl SessionStore {
    /// Create a store over the given engine and clock.
    #[must_use]
    pub fn new(engine: Arc<dyn StorageEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            batch: BatchExecutor::new(engine.clone()),
            engine,
            clock,
        }
    }

    /// Mint and persist a session for a user, expiring `ttl_ms` from now.
    ///
    /// # Errors
    /// Returns [`SessionError::Upstream`] when the engine write fails.
    pub async fn create_session(
        &self,
        user: &UserId,
        ttl_ms: i64,
    ) -> Result<Session, SessionError> {
        let created_at_ms = self.clock.utc().timestamp_millis();
        let session = Session {
            id: SessionId::random(),
            user_id: user.clone(),
            created_at_ms,
            expires_at_ms: created_at_ms.saturating_add(ttl_ms),
            provider: None,
        };
        self.engine
            .put(session_item(&session)?)
            .await
            .map_err(|error| map_engine_error("create", error))?;
        Ok(session)
    }

    /// Point lookup by identifier. Absent and expired sessions both read as
    /// `None`.
    ///
    /// # Errors
    /// Returns [`SessionError::Upstream`] when the engine fails and
    /// [`SessionError::Malformed`] when the stored record does not decode.
    pub async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
        let key = keys::session_key(id);
        let Some(item) = self
            .engine
            .get(&key)
            .await
            .map_err(|error| map_engine_error("lookup", error))?
        else {
            return Ok(None);
        };
        let session = session_from_item(item)?;
        if session.is_expired(self.clock.utc().timestamp_millis()) {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Delete one session; deleting an absent session is a no-op.
    ///
    /// # Errors
    /// Returns [`SessionError::Upstream`] when the engine fails.
    pub async fn delete_session(&self, id: &SessionId) -> Result<(), SessionError> {
        let key = keys::session_key(id);
        self.engine
            .delete(&key)
            .await
            .map_err(|error| map_engine_error("delete", error))
    }

    /// Every live session of a user, expired records filtered out.
    ///
    /// # Errors
    /// Returns [`SessionError::Upstream`] when the engine fails and
    /// [`SessionError::Malformed`] when a stored record does not decode.
    pub async fn get_sessions_for_user(
        &self,
        user: &UserId,
    ) -> Result<Vec<Session>, SessionError> {
        let now_ms = self.clock.utc().timestamp_millis();
        let sessions = self.collect_sessions(user).await?;
        Ok(sessions
            .into_iter()
            .filter(|session| !session.is_expired(now_ms))
            .collect())
    }

    /// Delete every session of a user, expired records included.
    ///
    /// # Errors
    /// Returns [`SessionError::Upstream`] when the engine fails.
    pub async fn delete_sessions_for_user(&self, user: &UserId) -> Result<(), SessionError> {
        let sessions = self.collect_sessions(user).await?;
        let deletes = sessions
            .into_iter()
            .map(|session| WriteRequest::Delete(session.identity_key()))
            .collect();
        self.batch
            .execute(deletes)
            .await
            .map_err(|error| map_engine_error("bulk delete", error))
    }

    /// Attach external provider credentials to a session, replacing any
    /// existing link and leaving unrelated fields untouched.
    ///
    /// # Errors
    /// Returns [`SessionError::MissingSession`] when the session does not
    /// exist or has expired and [`SessionError::Upstream`] when the engine
    /// fails.
    pub async fn add_external_provider(
        &self,
        id: &SessionId,
        link: ExternalProviderLink,
    ) -> Result<Session, SessionError> {
        self.mutate_session(id, |session| session.link_provider(link))
            .await
    }

    /// Remove any linked provider credentials from a session.
    ///
    /// # Errors
    /// Returns [`SessionError::MissingSession`] when the session does not
    /// exist or has expired and [`SessionError::Upstream`] when the engine
    /// fails.
    pub async fn remove_external_provider(
        &self,
        id: &SessionId,
    ) -> Result<Session, SessionError> {
        self.mutate_session(id, Session::unlink_provider).await
    }

    /// Read-modify-write of one session. The full record is rewritten so
    /// the mutation cannot destroy unrelated fields it never saw.
    async fn mutate_session(
        &self,
        id: &SessionId,
        mutate: impl FnOnce(&mut Session),
    ) -> Result<Session, SessionError> {
        let mut session =
            self.get_session(id)
                .await?
                .ok_or_else(|| SessionError::MissingSession {
                    session_id: id.clone(),
                })?;
        mutate(&mut session);
        self.engine
            .put(session_item(&session)?)
            .await
            .map_err(|error| map_engine_error("mutate", error))?;
        Ok(session)
    }

    async fn collect_sessions(&self, user: &UserId) -> Result<Vec<Session>, SessionError> {
        let mut sessions = Vec::new();
        let mut start_key = None;
        loop {
            let page = self
                .engine
                .query(
                    QueryRequest::new(
                        QueryIndex::Secondary(SecondaryIndex::Gsi1),
                        keys::user_sessions_partition(user),
                    )
                    .limit(pagination::MAX_PAGE_SIZE)
                    .start_after(start_key.take()),
                )
                .await
                .map_err(|error| map_engine_error("collect", error))?;
            for item in page.items {
                sessions.push(session_from_item(item)?);
            }
            match page.last_key {
                Some(key) => start_key = Some(key),
                None => return Ok(sessions),
            }
        }
    }
}

/// Serialise a session into an engine item with its per-user projection.
fn session_item(session: &Session) -> Result<Item, SessionError> {
    let value = serde_json::to_value(session).map_err(|error| SessionError::Malformed {
        message: error.to_string(),
    })?;
    let Value::Object(mut item) = value else {
        return Err(SessionError::Malformed {
            message: "session did not serialise to an object".to_owned(),
        });
    };

    let key = session.identity_key();
    item.insert("pk".to_owned(), Value::String(key.partition));
    item.insert("sk".to_owned(), Value::String(key.sort));
    item.insert(
        "gsi1pk".to_owned(),
        Value::String(keys::user_sessions_partition(&session.user_id)),
    );
    item.insert(
        "gsi1sk".to_owned(),
        Value::String(keys::session_ref_sort_key(&session.id)),
    );
    Ok(item)
}

fn session_from_item(item: Item) -> Result<Session, SessionError> {
    serde_json::from_value(Value::Object(item)).map_err(|error| SessionError::Malformed {
        message: error.to_string(),
    })
}
