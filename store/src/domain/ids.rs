//! Validated identifiers shared across the store.
//!
//! Identifier fragments end up embedded in composite `#`-delimited keys, so
//! construction rejects values that would corrupt the key scheme.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Validation errors returned by identifier constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdValidationError {
    /// The value was empty after trimming.
    Empty,
    /// The value carried surrounding whitespace.
    ContainsWhitespace,
    /// The value contained the `#` key delimiter.
    ContainsDelimiter,
    /// The value was not a valid UUID.
    InvalidUuid,
}

impl fmt::Display for IdValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "identifier must not be empty"),
            Self::ContainsWhitespace => {
                write!(f, "identifier must not contain surrounding whitespace")
            }
            Self::ContainsDelimiter => write!(f, "identifier must not contain `#`"),
            Self::InvalidUuid => write!(f, "identifier must be a valid UUID"),
        }
    }
}

impl std::error::Error for IdValidationError {}

fn validate_fragment(value: &str) -> Result<(), IdValidationError> {
    if value.is_empty() {
        return Err(IdValidationError::Empty);
    }
    if value.trim() != value {
        return Err(IdValidationError::ContainsWhitespace);
    }
    if value.contains('#') {
        return Err(IdValidationError::ContainsDelimiter);
    }
    Ok(())
}

/// Stable user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate and construct a [`UserId`] from borrowed input.
    pub fn new(id: impl AsRef<str>) -> Result<Self, IdValidationError> {
        let raw = id.as_ref();
        validate_fragment(raw)?;
        Ok(Self(raw.to_owned()))
    }

    /// Generate a new random [`UserId`].
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl TryFrom<String> for UserId {
    type Error = IdValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_fragment(&value)?;
        Ok(Self(value))
    }
}

/// Numeric series identifier assigned by the metadata provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SeriesId(pub u64);

impl SeriesId {
    /// The raw numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identifier, a UUID minted at login.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(Uuid, String);

impl SessionId {
    /// Parse a [`SessionId`] from its string form.
    pub fn new(id: impl AsRef<str>) -> Result<Self, IdValidationError> {
        Self::from_owned(id.as_ref().to_owned())
    }

    /// Mint a fresh random session identifier.
    #[must_use]
    pub fn random() -> Self {
        let uuid = Uuid::new_v4();
        Self(uuid, uuid.to_string())
    }

    fn from_owned(raw: String) -> Result<Self, IdValidationError> {
        let parsed = Uuid::parse_str(&raw).map_err(|_| IdValidationError::InvalidUuid)?;
        Ok(Self(parsed, raw))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.1.as_str()
    }

    /// Access the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.1
    }
}

impl TryFrom<String> for SessionId {
    type Error = IdValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_owned(value)
    }
}

/// Identifier of a user-created list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CustomListId(String);

impl CustomListId {
    /// Validate and construct a custom list identifier.
    pub fn new(id: impl AsRef<str>) -> Result<Self, IdValidationError> {
        let raw = id.as_ref();
        validate_fragment(raw)?;
        Ok(Self(raw.to_owned()))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<CustomListId> for String {
    fn from(value: CustomListId) -> Self {
        value.0
    }
}

impl TryFrom<String> for CustomListId {
    type Error = IdValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_fragment(&value)?;
        Ok(Self(value))
    }
}

/// A list a series can belong to: the built-in lists or a user-created one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ListId {
    /// Series queued up to watch.
    Watchlist,
    /// Favourite series.
    Favorites,
    /// Series currently being watched.
    InProgress,
    /// Series watched to completion, exposed as a list.
    Watched,
    /// A user-created list.
    Custom(CustomListId),
}

const WATCHLIST: &str = "WATCHLIST";
const FAVORITES: &str = "FAVORITES";
const IN_PROGRESS: &str = "IN_PROGRESS";
const WATCHED: &str = "WATCHED";

impl ListId {
    /// The key fragment naming this list.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Watchlist => WATCHLIST,
            Self::Favorites => FAVORITES,
            Self::InProgress => IN_PROGRESS,
            Self::Watched => WATCHED,
            Self::Custom(id) => id.as_str(),
        }
    }

    /// Whether this is a user-created list (the only kind with manual
    /// positions).
    #[must_use]
    pub const fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ListId> for String {
    fn from(value: ListId) -> Self {
        match value {
            ListId::Custom(id) => id.into(),
            builtin => builtin.as_str().to_owned(),
        }
    }
}

impl TryFrom<String> for ListId {
    type Error = IdValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(match value.as_str() {
            WATCHLIST => Self::Watchlist,
            FAVORITES => Self::Favorites,
            IN_PROGRESS => Self::InProgress,
            WATCHED => Self::Watched,
            _ => Self::Custom(CustomListId::try_from(value)?),
        })
    }
}

#[cfg(test)]
mod tests {
    //! Identifier validation edge cases.

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("", IdValidationError::Empty)]
    #[case(" padded ", IdValidationError::ContainsWhitespace)]
    #[case("with#hash", IdValidationError::ContainsDelimiter)]
    fn user_id_rejects_key_corrupting_values(
        #[case] raw: &str,
        #[case] expected: IdValidationError,
    ) {
        let error = UserId::new(raw).expect_err("invalid id rejected");
        assert_eq!(error, expected);
    }

    #[rstest]
    fn user_id_round_trips_through_serde() {
        let id = UserId::new("u-123").expect("valid id");
        let json = serde_json::to_string(&id).expect("serialises");
        assert_eq!(json, "\"u-123\"");
        let back: UserId = serde_json::from_str(&json).expect("deserialises");
        assert_eq!(back, id);
    }

    #[rstest]
    fn session_id_requires_uuid_form() {
        let error = SessionId::new("not-a-uuid").expect_err("non-uuid rejected");
        assert_eq!(error, IdValidationError::InvalidUuid);

        let minted = SessionId::random();
        let parsed = SessionId::new(minted.as_str()).expect("round trip");
        assert_eq!(parsed, minted);
    }

    #[rstest]
    #[case(ListId::Watchlist, "WATCHLIST")]
    #[case(ListId::Favorites, "FAVORITES")]
    #[case(ListId::InProgress, "IN_PROGRESS")]
    #[case(ListId::Watched, "WATCHED")]
    fn builtin_lists_use_fixed_fragments(#[case] list: ListId, #[case] fragment: &str) {
        assert_eq!(list.as_str(), fragment);
        assert!(!list.is_custom());
    }

    #[rstest]
    fn custom_list_ids_parse_from_unknown_fragments() {
        let list = ListId::try_from("holiday-binge".to_owned()).expect("custom id accepted");
        assert!(list.is_custom());
        assert_eq!(list.as_str(), "holiday-binge");
    }
}
