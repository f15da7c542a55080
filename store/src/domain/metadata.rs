//! Series metadata types and the TMDB collaborator port.
//!
//! The metadata service is an external, read-only collaborator. The store
//! only needs enough of its shape to decide which episodes have aired and to
//! denormalise display fields onto watched records.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::SeriesId;

/// Failures surfaced by the metadata collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    /// The metadata service request failed.
    #[error("metadata lookup failed: {message}")]
    Lookup {
        /// Collaborator failure detail.
        message: String,
    },
}

impl MetadataError {
    /// Helper for lookup failures.
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup {
            message: message.into(),
        }
    }
}

/// One episode as described by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    /// Episode number within its season.
    pub episode_number: u16,
    /// Episode title, when known.
    pub title: Option<String>,
    /// First air date; absent means the episode has not aired.
    pub air_date: Option<NaiveDate>,
    /// Runtime in minutes, when known.
    pub runtime_minutes: Option<u32>,
    /// Relative still image path.
    pub still_path: Option<String>,
}

impl EpisodeMetadata {
    /// Whether the episode has aired on or before `today`. An episode with
    /// no air date is treated as not aired.
    #[must_use]
    pub fn has_aired(&self, today: NaiveDate) -> bool {
        self.air_date.is_some_and(|date| date <= today)
    }
}

/// One season as described by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonMetadata {
    /// Season number; 0 is the specials season.
    pub season_number: u16,
    /// First air date of the season.
    pub air_date: Option<NaiveDate>,
    /// Episodes in episode-number order.
    pub episodes: Vec<EpisodeMetadata>,
}

impl SeasonMetadata {
    /// Whether the season has started airing by `today`. A season with no
    /// air date is treated as unaired.
    #[must_use]
    pub fn has_started_airing(&self, today: NaiveDate) -> bool {
        self.air_date.is_some_and(|date| date <= today)
    }

    /// Episodes that have aired on or before `today`.
    #[must_use]
    pub fn aired_episodes(&self, today: NaiveDate) -> Vec<&EpisodeMetadata> {
        self.episodes
            .iter()
            .filter(|episode| episode.has_aired(today))
            .collect()
    }
}

/// Summary of a season as listed on its series record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonSummary {
    /// Season number; 0 is the specials season.
    pub season_number: u16,
    /// First air date of the season.
    pub air_date: Option<NaiveDate>,
}

/// A series as described by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    /// Series identifier.
    pub id: SeriesId,
    /// Display title.
    pub title: String,
    /// Relative poster image path.
    pub poster_path: Option<String>,
    /// Seasons in season-number order.
    pub seasons: Vec<SeasonSummary>,
}

impl SeriesMetadata {
    /// Regular seasons (specials excluded) that started airing by `today`,
    /// the fan-out set for marking a whole series watched.
    #[must_use]
    pub fn aired_season_numbers(&self, today: NaiveDate) -> Vec<u16> {
        self.seasons
            .iter()
            .filter(|season| {
                season.season_number > 0
                    && season.air_date.is_some_and(|date| date <= today)
            })
            .map(|season| season.season_number)
            .collect()
    }
}

/// Read-only port onto the metadata service.
#[async_trait]
pub trait SeasonSource: Send + Sync {
    /// Fetch one season of a series; `None` when the season does not exist.
    async fn fetch_season(
        &self,
        series: SeriesId,
        season_number: u16,
    ) -> Result<Option<SeasonMetadata>, MetadataError>;
}

#[cfg(test)]
mod tests {
    //! Air-date policy coverage.

    use rstest::rstest;

    use super::*;

    fn date(raw: &str) -> NaiveDate {
        raw.parse().expect("valid ISO date")
    }

    fn episode(number: u16, air_date: Option<&str>) -> EpisodeMetadata {
        EpisodeMetadata {
            episode_number: number,
            title: None,
            air_date: air_date.map(date),
            runtime_minutes: None,
            still_path: None,
        }
    }

    #[rstest]
    #[case(Some("2024-01-01"), true)]
    #[case(Some("2024-06-15"), true)]
    #[case(Some("2024-06-16"), false)]
    #[case(None, false)]
    fn episode_airing_compares_against_today(
        #[case] air_date: Option<&str>,
        #[case] expected: bool,
    ) {
        let today = date("2024-06-15");
        assert_eq!(episode(1, air_date).has_aired(today), expected);
    }

    #[rstest]
    fn aired_episodes_filters_unaired_and_undated() {
        let season = SeasonMetadata {
            season_number: 1,
            air_date: Some(date("2024-01-01")),
            episodes: vec![
                episode(1, Some("2024-01-01")),
                episode(2, Some("2024-01-08")),
                episode(3, Some("2099-01-01")),
                episode(4, None),
            ],
        };

        let aired = season.aired_episodes(date("2024-06-15"));
        let numbers: Vec<u16> = aired.iter().map(|e| e.episode_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[rstest]
    fn series_fan_out_excludes_specials_and_unaired_seasons() {
        let series = SeriesMetadata {
            id: SeriesId(1399),
            title: "Game of Thrones".to_owned(),
            poster_path: None,
            seasons: vec![
                SeasonSummary {
                    season_number: 0,
                    air_date: Some(date("2010-12-05")),
                },
                SeasonSummary {
                    season_number: 1,
                    air_date: Some(date("2011-04-17")),
                },
                SeasonSummary {
                    season_number: 2,
                    air_date: None,
                },
                SeasonSummary {
                    season_number: 3,
                    air_date: Some(date("2099-03-31")),
                },
            ],
        };

        assert_eq!(series.aired_season_numbers(date("2024-06-15")), vec![1]);
    }
}
