//! Watched-episode entity and its read-time display view.

use serde::{Deserialize, Serialize};

use crate::config::ImageUrlResolver;

use super::ids::{SeriesId, UserId};
use super::keys;
use super::ports::ItemKey;

/// Attribution for where an episode was watched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchProvider {
    /// Provider display name.
    pub name: String,
    /// Relative provider logo path.
    pub logo_path: Option<String>,
}

/// One watched episode: at most one record exists per
/// (user, series, season, episode), enforced by deriving the primary sort
/// key from those fields so a repeated mark overwrites rather than
/// duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEpisode {
    /// Owning user.
    pub user_id: UserId,
    /// Series the episode belongs to.
    pub series_id: SeriesId,
    /// Season number; 0 is the specials season.
    pub season_number: u16,
    /// Episode number within the season.
    pub episode_number: u16,
    /// When the user watched it, epoch milliseconds.
    pub watched_at_ms: i64,
    /// Episode runtime in minutes, when known.
    pub runtime_minutes: Option<u32>,
    /// Episode title, when known.
    pub episode_title: Option<String>,
    /// Series display title, denormalised for history rendering.
    pub series_title: String,
    /// Relative series poster path; resolved to a URL at read time.
    pub poster_path: Option<String>,
    /// Relative episode still path; resolved to a URL at read time.
    pub still_path: Option<String>,
    /// Where it was watched, when attributed.
    pub provider: Option<WatchProvider>,
}

impl WatchedEpisode {
    /// The identity key this record overwrites itself under.
    #[must_use]
    pub fn identity_key(&self) -> ItemKey {
        keys::watched_episode_key(
            &self.user_id,
            self.series_id,
            self.season_number,
            self.episode_number,
        )
    }
}

/// A watched episode with relative image paths resolved into absolute
/// display URLs. Resolution happens at read time so a base-URL change never
/// needs a backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEpisodeView {
    /// The stored record.
    pub episode: WatchedEpisode,
    /// Absolute poster URL, when a poster path is stored.
    pub poster_url: Option<String>,
    /// Absolute still URL, when a still path is stored.
    pub still_url: Option<String>,
}

impl WatchedEpisodeView {
    /// Resolve display URLs for a stored record.
    #[must_use]
    pub fn resolve(episode: WatchedEpisode, images: &ImageUrlResolver) -> Self {
        let poster_url = episode.poster_path.as_deref().map(|path| images.resolve(path));
        let still_url = episode.still_path.as_deref().map(|path| images.resolve(path));
        Self {
            episode,
            poster_url,
            still_url,
        }
    }
}
