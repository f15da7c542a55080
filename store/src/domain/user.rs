//! User profile entity and the patch applied by profile updates.

use serde::{Deserialize, Serialize};

use super::ids::UserId;
use super::keys;
use super::ports::ItemKey;

/// One user profile. Created once, mutated only through the optimistic
/// concurrency path in the user store, never hard-deleted by this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identifier.
    pub id: UserId,
    /// Email address; globally unique under case-insensitive comparison.
    pub email: Option<String>,
    /// Username; globally unique under case-insensitive comparison.
    pub username: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Relative avatar image path.
    pub avatar_path: Option<String>,
    /// When the profile was created, epoch milliseconds.
    pub created_at_ms: i64,
    /// Optimistic-concurrency watermark: the last update time observed by a
    /// reader must be asserted by the next writer. Absent until the first
    /// update; skipped when serialising so a create-only conditional write
    /// can assert the attribute is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_ms: Option<i64>,
}

impl User {
    /// The identity key this record overwrites itself under.
    #[must_use]
    pub fn identity_key(&self) -> ItemKey {
        keys::user_key(&self.id)
    }

    /// Normalised email used for the uniqueness lookup.
    #[must_use]
    pub fn normalised_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(|email| email.trim().to_lowercase())
    }

    /// Normalised username used for the uniqueness lookup.
    #[must_use]
    pub fn normalised_username(&self) -> Option<String> {
        self.username
            .as_deref()
            .map(|username| username.trim().to_lowercase())
    }
}

/// Fields a profile update may change. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    /// New email address.
    pub email: Option<String>,
    /// New username.
    pub username: Option<String>,
    /// New display name.
    pub name: Option<String>,
    /// New avatar path.
    pub avatar_path: Option<String>,
}

impl UserPatch {
    /// Apply the patch to a profile, leaving unset fields alone.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(email) = &self.email {
            user.email = Some(email.clone());
        }
        if let Some(username) = &self.username {
            user.username = Some(username.clone());
        }
        if let Some(name) = &self.name {
            user.name = Some(name.clone());
        }
        if let Some(avatar_path) = &self.avatar_path {
            user.avatar_path = Some(avatar_path.clone());
        }
    }
}
