//! Token store: one-time login codes and webhook ingestion tokens.
//!
//! Both record kinds are simple keyed items with an expiry deadline. The
//! engine's TTL purge removes them eventually, but validity is always
//! checked against the deadline here; a record the purge has not yet
//! collected is never accepted past it. OTP codes are additionally
//! single-use: a successful verification deletes the record.

use std::sync::Arc;

use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::ids::UserId;
use super::keys;
use super::ports::{Item, StorageEngine, StorageEngineError};

/// Failures surfaced by the token store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The storage engine failed.
    #[error("token {operation} failed: {message}")]
    Upstream {
        /// The operation that failed.
        operation: &'static str,
        /// Engine failure detail.
        message: String,
    },
    /// A stored record did not deserialise.
    #[error("stored token is malformed: {message}")]
    Malformed {
        /// Decoder detail.
        message: String,
    },
}

fn map_engine_error(operation: &'static str, error: StorageEngineError) -> TokenError {
    debug!(operation, %error, "token engine operation failed");
    TokenError::Upstream {
        operation,
        message: error.to_string(),
    }
}

/// One-time login code issued to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct OtpRecord {
    user_id: UserId,
    code: String,
    expires_at_ms: i64,
}

/// Long-lived token authorising webhook ingestion for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookToken {
    /// The opaque token value.
    pub token: String,
    /// The user webhook payloads are attributed to.
    pub user_id: UserId,
    /// When the token was minted, epoch milliseconds.
    pub created_at_ms: i64,
}

/// Store service for one-time codes and webhook tokens.
#[derive(Clone)]
pub struct TokenStore {
    engine: Arc<dyn StorageEngine>,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    /// Create a store over the given engine and clock.
    #[must_use]
    pub fn new(engine: Arc<dyn StorageEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }

    /// Persist a one-time code for a user, valid for `ttl_ms`.
    ///
    /// # Errors
    /// Returns [`TokenError::Upstream`] when the engine write fails.
    pub async fn create_otp(
        &self,
        user: &UserId,
        code: &str,
        ttl_ms: i64,
    ) -> Result<(), TokenError> {
        let record = OtpRecord {
            user_id: user.clone(),
            code: code.to_owned(),
            expires_at_ms: self.clock.utc().timestamp_millis().saturating_add(ttl_ms),
        };
        self.engine
            .put(otp_item(&record)?)
            .await
            .map_err(|error| map_engine_error("otp create", error))
    }

    /// Verify and consume a one-time code. Returns `true` exactly once for
    /// a live code; unknown, expired and already-consumed codes return
    /// `false`.
    ///
    /// # Errors
    /// Returns [`TokenError::Upstream`] when the engine fails and
    /// [`TokenError::Malformed`] when the stored record does not decode.
    pub async fn consume_otp(&self, user: &UserId, code: &str) -> Result<bool, TokenError> {
        let key = keys::otp_key(user, code);
        let Some(item) = self
            .engine
            .get(&key)
            .await
            .map_err(|error| map_engine_error("otp lookup", error))?
        else {
            return Ok(false);
        };
        let record: OtpRecord =
            serde_json::from_value(Value::Object(item)).map_err(|error| TokenError::Malformed {
                message: error.to_string(),
            })?;

        // A record the TTL purge has not collected yet is still invalid
        // past its deadline.
        if record.expires_at_ms <= self.clock.utc().timestamp_millis() {
            return Ok(false);
        }
        self.engine
            .delete(&key)
            .await
            .map_err(|error| map_engine_error("otp consume", error))?;
        Ok(true)
    }

    /// Mint and persist a webhook token for a user.
    ///
    /// # Errors
    /// Returns [`TokenError::Upstream`] when the engine write fails.
    pub async fn create_webhook_token(&self, user: &UserId) -> Result<WebhookToken, TokenError> {
        let record = WebhookToken {
            token: Uuid::new_v4().to_string(),
            user_id: user.clone(),
            created_at_ms: self.clock.utc().timestamp_millis(),
        };
        self.engine
            .put(webhook_item(&record)?)
            .await
            .map_err(|error| map_engine_error("webhook create", error))?;
        Ok(record)
    }

    /// Resolve a webhook token to its owning user.
    ///
    /// # Errors
    /// Returns [`TokenError::Upstream`] when the engine fails and
    /// [`TokenError::Malformed`] when the stored record does not decode.
    pub async fn get_user_for_webhook_token(
        &self,
        token: &str,
    ) -> Result<Option<UserId>, TokenError> {
        let key = keys::webhook_token_key(token);
        let Some(item) = self
            .engine
            .get(&key)
            .await
            .map_err(|error| map_engine_error("webhook lookup", error))?
        else {
            return Ok(None);
        };
        let record: WebhookToken =
            serde_json::from_value(Value::Object(item)).map_err(|error| TokenError::Malformed {
                message: error.to_string(),
            })?;
        Ok(Some(record.user_id))
    }

    /// Revoke a webhook token; revoking an unknown token is a no-op.
    ///
    /// # Errors
    /// Returns [`TokenError::Upstream`] when the engine fails.
    pub async fn delete_webhook_token(&self, token: &str) -> Result<(), TokenError> {
        let key = keys::webhook_token_key(token);
        self.engine
            .delete(&key)
            .await
            .map_err(|error| map_engine_error("webhook revoke", error))
    }
}

fn otp_item(record: &OtpRecord) -> Result<Item, TokenError> {
    let value = serde_json::to_value(record).map_err(|error| TokenError::Malformed {
        message: error.to_string(),
    })?;
    let Value::Object(mut item) = value else {
        return Err(TokenError::Malformed {
            message: "otp record did not serialise to an object".to_owned(),
        });
    };
    let key = keys::otp_key(&record.user_id, &record.code);
    item.insert("pk".to_owned(), Value::String(key.partition));
    item.insert("sk".to_owned(), Value::String(key.sort));
    Ok(item)
}

fn webhook_item(record: &WebhookToken) -> Result<Item, TokenError> {
    let value = serde_json::to_value(record).map_err(|error| TokenError::Malformed {
        message: error.to_string(),
    })?;
    let Value::Object(mut item) = value else {
        return Err(TokenError::Malformed {
            message: "webhook token did not serialise to an object".to_owned(),
        });
    };
    let key = keys::webhook_token_key(&record.token);
    item.insert("pk".to_owned(), Value::String(key.partition));
    item.insert("sk".to_owned(), Value::String(key.sort));
    Ok(item)
}
