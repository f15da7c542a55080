//! Shared test doubles and fixtures for the store services.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::ids::SeriesId;
use crate::domain::metadata::{
    EpisodeMetadata, MetadataError, SeasonMetadata, SeasonSource, SeasonSummary, SeriesMetadata,
};

/// Clock double whose reading tests can advance.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance_seconds(&self, seconds: i64) {
        *self.lock_clock() += TimeDelta::seconds(seconds);
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("clock mutex"),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

/// The fixed "now" most store tests run at: 2024-06-15 12:00:00 UTC.
pub fn fixture_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-06-15T12:00:00Z")
        .expect("valid fixture timestamp")
        .with_timezone(&Utc)
}

pub fn date(raw: &str) -> NaiveDate {
    raw.parse().expect("valid ISO date")
}

/// Season source double serving seasons registered by the test.
#[derive(Default)]
pub struct StubSeasonSource {
    seasons: Mutex<HashMap<(SeriesId, u16), SeasonMetadata>>,
}

impl StubSeasonSource {
    pub fn with_season(self, series: SeriesId, season: SeasonMetadata) -> Self {
        self.seasons
            .lock()
            .expect("seasons lock")
            .insert((series, season.season_number), season);
        self
    }
}

#[async_trait]
impl SeasonSource for StubSeasonSource {
    async fn fetch_season(
        &self,
        series: SeriesId,
        season_number: u16,
    ) -> Result<Option<SeasonMetadata>, MetadataError> {
        Ok(self
            .seasons
            .lock()
            .expect("seasons lock")
            .get(&(series, season_number))
            .cloned())
    }
}

/// A season whose episodes `1..=aired` aired weekly before the fixture date
/// and `aired+1..=total` air in 2099.
pub fn season(season_number: u16, aired: u16, total: u16) -> SeasonMetadata {
    let episodes = (1..=total)
        .map(|episode_number| EpisodeMetadata {
            episode_number,
            title: Some(format!("Episode {episode_number}")),
            air_date: Some(if episode_number <= aired {
                date("2024-01-01") + TimeDelta::weeks(i64::from(episode_number))
            } else {
                date("2099-01-01")
            }),
            runtime_minutes: Some(45),
            still_path: Some(format!("/still-{season_number}-{episode_number}.jpg")),
        })
        .collect();
    SeasonMetadata {
        season_number,
        air_date: Some(date("2024-01-01")),
        episodes,
    }
}

/// A series record advertising the given aired seasons plus a specials
/// season that the series fan-out must skip.
pub fn series(id: SeriesId, aired_seasons: &[u16]) -> SeriesMetadata {
    let mut seasons = vec![SeasonSummary {
        season_number: 0,
        air_date: Some(date("2023-12-25")),
    }];
    seasons.extend(aired_seasons.iter().map(|&season_number| SeasonSummary {
        season_number,
        air_date: Some(date("2024-01-01")),
    }));
    SeriesMetadata {
        id,
        title: "Test Series".to_owned(),
        poster_path: Some("/poster.jpg".to_owned()),
        seasons,
    }
}
