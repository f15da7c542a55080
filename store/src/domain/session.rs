//! Session entity with external-provider link mutations.

use serde::{Deserialize, Serialize};

use super::ids::{SessionId, UserId};
use super::keys;
use super::ports::ItemKey;

/// Credentials linking a session to an external watch provider account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalProviderLink {
    /// Provider name.
    pub provider: String,
    /// Provider access token.
    pub access_token: String,
    /// Provider refresh token, when issued.
    pub refresh_token: Option<String>,
}

/// One login session. Created at login, mutated only when linking or
/// unlinking an external provider, deleted at logout or expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// The user the session belongs to.
    pub user_id: UserId,
    /// When the session was created, epoch milliseconds.
    pub created_at_ms: i64,
    /// When the session expires, epoch milliseconds. The engine's TTL purge
    /// handles physical deletion.
    pub expires_at_ms: i64,
    /// Linked external provider credentials, when present.
    pub provider: Option<ExternalProviderLink>,
}

impl Session {
    /// The identity key this record overwrites itself under.
    #[must_use]
    pub fn identity_key(&self) -> ItemKey {
        keys::session_key(&self.id)
    }

    /// Whether the session has passed its expiry deadline.
    #[must_use]
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }

    /// Attach external provider credentials, replacing any existing link and
    /// leaving every other field untouched.
    pub fn link_provider(&mut self, link: ExternalProviderLink) {
        self.provider = Some(link);
    }

    /// Remove any linked provider credentials, leaving every other field
    /// untouched.
    pub fn unlink_provider(&mut self) {
        self.provider = None;
    }
}
