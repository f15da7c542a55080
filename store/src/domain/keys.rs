//! Composite key codec for the single-table layout.
//!
//! Keys are `#`-delimited strings with fixed-width zero-padded numeric
//! fields so lexicographic ordering matches numeric ordering: season 2 must
//! sort before season 10, which needs `S002 < S010` rather than `S2 < S10`.
//! Identity keys are derived deterministically from an entity's logical
//! identity, so two logically identical operations produce byte-identical
//! keys and repeated writes overwrite instead of duplicating.
//!
//! Pad widths: 3 digits for season/episode numbers (values above 999 are a
//! caller error), 14 digits for epoch-millisecond timestamps and 6 digits for
//! manual list positions.

use super::ids::{ListId, SeriesId, SessionId, UserId};
use super::ports::ItemKey;

/// Fixed sort-key value for single-record partitions holding a user profile.
pub const USER_PROFILE_SORT: &str = "PROFILE";

/// Fixed sort-key value for session records.
pub const SESSION_SORT: &str = "SESSION";

/// Fixed sort-key value for cache records.
pub const CACHE_SORT: &str = "VALUE";

/// Fixed sort-key value for webhook token records.
pub const WEBHOOK_TOKEN_SORT: &str = "TOKEN";

/// Zero-pad an epoch-millisecond timestamp for lexicographic time ordering.
/// Negative timestamps clamp to zero; the tracker has no pre-1970 history.
#[must_use]
pub fn timestamp_sort_key(epoch_ms: i64) -> String {
    format!("{:014}", epoch_ms.max(0))
}

/// Zero-pad a manual list position.
#[must_use]
pub fn position_sort_key(position: u32) -> String {
    format!("{position:06}")
}

/// Sort key ordering episodes within a series: `S{sss}#E{eee}`.
#[must_use]
pub fn episode_sort_key(season_number: u16, episode_number: u16) -> String {
    format!("S{season_number:03}#E{episode_number:03}")
}

/// Prefix matching every episode sort key of one season.
#[must_use]
pub fn season_sort_prefix(season_number: u16) -> String {
    format!("S{season_number:03}#")
}

/// Parse an episode sort key back into (season, episode) numbers.
#[must_use]
pub fn parse_episode_sort_key(sort_key: &str) -> Option<(u16, u16)> {
    let (season_part, episode_part) = sort_key.split_once('#')?;
    let season = season_part.strip_prefix('S')?.parse().ok()?;
    let episode = episode_part.strip_prefix('E')?.parse().ok()?;
    Some((season, episode))
}

/// Partition grouping everything owned by one user.
#[must_use]
pub fn user_partition(user: &UserId) -> String {
    format!("USER#{user}")
}

/// Identity key of one watched episode.
#[must_use]
pub fn watched_episode_key(
    user: &UserId,
    series: SeriesId,
    season_number: u16,
    episode_number: u16,
) -> ItemKey {
    ItemKey::new(
        user_partition(user),
        format!(
            "WATCHED#{series}#{}",
            episode_sort_key(season_number, episode_number)
        ),
    )
}

/// gsi1 partition grouping a user's watched episodes for one series, ordered
/// by `S{sss}#E{eee}`.
#[must_use]
pub fn watched_series_partition(user: &UserId, series: SeriesId) -> String {
    format!("USER#{user}#WATCHED#{series}")
}

/// gsi2 partition grouping a user's entire watch history, ordered by padded
/// watch timestamp.
#[must_use]
pub fn watched_time_partition(user: &UserId) -> String {
    format!("USER#{user}#WATCHED")
}

/// Partition holding one list of one user, and the shared gsi partition for
/// its alternative orderings.
#[must_use]
pub fn list_partition(user: &UserId, list: &ListId) -> String {
    format!("USER#{user}#LIST#{list}")
}

/// Identity key of one list membership.
#[must_use]
pub fn list_item_key(user: &UserId, list: &ListId, series: SeriesId) -> ItemKey {
    ItemKey::new(list_partition(user, list), format!("ITEM#{series}"))
}

/// Sort key ordering list items by creation time with the series id as a
/// tie-break.
#[must_use]
pub fn list_created_sort_key(epoch_ms: i64, series: SeriesId) -> String {
    format!("{}#{series}", timestamp_sort_key(epoch_ms))
}

/// Identity key of a directed follow edge.
#[must_use]
pub fn follow_edge_key(follower: &UserId, following: &UserId) -> ItemKey {
    ItemKey::new(following_partition(follower), format!("USER#{following}"))
}

/// gsi1 partition listing the followers of a user, newest first under a
/// descending scan of `{ms14}#USER#{follower}` sort keys.
#[must_use]
pub fn followers_partition(user: &UserId) -> String {
    format!("USER#{user}#FOLLOWERS")
}

/// Primary and gsi2 partition listing who a user follows.
#[must_use]
pub fn following_partition(user: &UserId) -> String {
    format!("USER#{user}#FOLLOWING")
}

/// Sort key ordering follow edges by time with the counterpart id as a
/// tie-break.
#[must_use]
pub fn follow_time_sort_key(epoch_ms: i64, other: &UserId) -> String {
    format!("{}#USER#{other}", timestamp_sort_key(epoch_ms))
}

/// Identity key of a session record.
#[must_use]
pub fn session_key(session: &SessionId) -> ItemKey {
    ItemKey::new(format!("SESSION#{session}"), SESSION_SORT)
}

/// gsi1 partition listing all sessions of a user.
#[must_use]
pub fn user_sessions_partition(user: &UserId) -> String {
    format!("USER#{user}#SESSIONS")
}

/// gsi1 sort key for a session within its user partition.
#[must_use]
pub fn session_ref_sort_key(session: &SessionId) -> String {
    format!("SESSION#{session}")
}

/// Identity key of a user profile.
#[must_use]
pub fn user_key(user: &UserId) -> ItemKey {
    ItemKey::new(user_partition(user), USER_PROFILE_SORT)
}

/// gsi1 partition for the globally unique normalised email lookup.
#[must_use]
pub fn email_partition(email: &str) -> String {
    format!("EMAIL#{}", email.trim().to_lowercase())
}

/// gsi2 partition for the globally unique normalised username lookup.
#[must_use]
pub fn username_partition(username: &str) -> String {
    format!("USERNAME#{}", username.trim().to_lowercase())
}

/// Identity key of a cache record.
#[must_use]
pub fn cache_key(key: &str) -> ItemKey {
    ItemKey::new(format!("CACHE#{key}"), CACHE_SORT)
}

/// Identity key of a one-time code issued to a user.
#[must_use]
pub fn otp_key(user: &UserId, code: &str) -> ItemKey {
    ItemKey::new(format!("OTP#{user}"), format!("CODE#{code}"))
}

/// Identity key of a webhook token record.
#[must_use]
pub fn webhook_token_key(token: &str) -> ItemKey {
    ItemKey::new(format!("WEBHOOK#{token}"), WEBHOOK_TOKEN_SORT)
}
