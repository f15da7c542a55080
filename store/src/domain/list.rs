//! List-membership entity and sort modes.

use serde::{Deserialize, Serialize};

use crate::config::ImageUrlResolver;

use super::ids::{ListId, SeriesId, UserId};
use super::keys;
use super::ports::ItemKey;

/// Sort modes for list queries, each backed by its own secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListSort {
    /// Creation time, the default ordering.
    #[default]
    CreatedAt,
    /// Lower-cased title, alphabetical. Ties resolve by the engine's stable
    /// key tie-break; the relative order of equal titles is unspecified.
    Title,
    /// Manual position; only meaningful for custom lists.
    Position,
}

/// One series' membership in one list: at most one record per
/// (user, list, series).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    /// Owning user.
    pub user_id: UserId,
    /// The list this membership belongs to.
    pub list_id: ListId,
    /// The series on the list.
    pub series_id: SeriesId,
    /// Series display title.
    pub title: String,
    /// URL slug for the series page.
    pub slug: Option<String>,
    /// Airing status at the time of adding.
    pub status: Option<String>,
    /// Relative poster path; resolved to a URL at read time.
    pub poster_path: Option<String>,
    /// When the series was added, epoch milliseconds.
    pub created_at_ms: i64,
    /// Manual ordering position; set only on custom lists.
    pub position: Option<u32>,
}

impl ListItem {
    /// The identity key this record overwrites itself under.
    #[must_use]
    pub fn identity_key(&self) -> ItemKey {
        keys::list_item_key(&self.user_id, &self.list_id, self.series_id)
    }

    /// Lower-cased title used as the alphabetical sort key.
    #[must_use]
    pub fn title_sort_key(&self) -> String {
        self.title.to_lowercase()
    }
}

/// A list item with its poster path resolved into a display URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItemView {
    /// The stored record.
    pub item: ListItem,
    /// Absolute poster URL, when a poster path is stored.
    pub poster_url: Option<String>,
}

impl ListItemView {
    /// Resolve the display URL for a stored record.
    #[must_use]
    pub fn resolve(item: ListItem, images: &ImageUrlResolver) -> Self {
        let poster_url = item.poster_path.as_deref().map(|path| images.resolve(path));
        Self { item, poster_url }
    }
}
