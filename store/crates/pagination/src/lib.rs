//! Opaque cursor and pagination envelope primitives shared by the store.
//!
//! Paginated queries against the key-value engine resume from the key
//! attributes of the last item a page returned. This crate wraps that
//! engine-native position in an opaque, URL-safe token so callers can thread
//! it through query parameters without learning the key schema.
//!
//! A cursor is only meaningful for a follow-up call with the same index and
//! filter parameters as the query that produced it; handing it to a different
//! query is undefined behaviour and deliberately not validated here.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Page size applied when a caller does not request an explicit limit.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Upper bound on a single page; bulk "fetch everything" loops page at this
/// cap until no cursor is returned.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Errors returned when decoding a transport cursor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    /// The token was not valid URL-safe base64.
    #[error("cursor is not valid base64: {message}")]
    InvalidEncoding {
        /// Decoder failure detail.
        message: String,
    },
    /// The decoded payload was not a string-to-string key map.
    #[error("cursor payload is not a key map: {message}")]
    InvalidPayload {
        /// Parser failure detail.
        message: String,
    },
}

/// Opaque resume point for a paginated query.
///
/// Internally this is the map of key attributes identifying the last item the
/// previous page evaluated. Callers must treat the encoded form as a black
/// box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cursor(BTreeMap<String, String>);

impl Cursor {
    /// Wrap an engine-native last-evaluated key map.
    #[must_use]
    pub const fn from_position(position: BTreeMap<String, String>) -> Self {
        Self(position)
    }

    /// Borrow the wrapped key attributes.
    #[must_use]
    pub const fn position(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Consume the cursor, yielding the wrapped key attributes.
    #[must_use]
    pub fn into_position(self) -> BTreeMap<String, String> {
        self.0
    }

    /// Encode the cursor as a URL-safe token.
    #[must_use]
    pub fn encode(&self) -> String {
        // A map of strings always serialises; an empty payload would only
        // arise from a serde_json regression.
        let bytes = serde_json::to_vec(&self.0).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Decode a transport token back into a cursor.
    ///
    /// # Errors
    /// Returns [`CursorError`] when the token is not URL-safe base64 or its
    /// payload is not a string-to-string map.
    pub fn decode(raw: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|error| CursorError::InvalidEncoding {
                message: error.to_string(),
            })?;
        let position = serde_json::from_slice(&bytes).map_err(|error| {
            CursorError::InvalidPayload {
                message: error.to_string(),
            }
        })?;
        Ok(Self(position))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<Cursor> for String {
    fn from(value: Cursor) -> Self {
        value.encode()
    }
}

impl TryFrom<String> for Cursor {
    type Error = CursorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}

/// Caller-supplied paging parameters for one query call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Requested page size; `None` applies the store default.
    pub limit: Option<usize>,
    /// Resume point from the previous page; `None` starts from the beginning.
    pub cursor: Option<Cursor>,
}

impl PageRequest {
    /// Request the first page with an explicit limit.
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            cursor: None,
        }
    }

    /// Continue a query from a returned cursor, keeping the same limit.
    #[must_use]
    pub const fn after(cursor: Cursor, limit: Option<usize>) -> Self {
        Self {
            limit,
            cursor: Some(cursor),
        }
    }

    /// Resolve the effective page size: the requested limit clamped into
    /// `1..=cap`, or `default` when absent.
    #[must_use]
    pub fn resolve_limit(&self, default: usize, cap: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, cap)
    }
}

/// One page of results plus the resume point for the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page, in the requested sort order.
    pub items: Vec<T>,
    /// Cursor for the next page; `None` means the result set is exhausted.
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    /// Build an empty final page.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    /// True when no further pages exist.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }

    /// Map the page items while preserving the cursor.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }
}
