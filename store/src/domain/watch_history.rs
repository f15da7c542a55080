//! Watch-history store: recording and querying watched episodes.
//!
//! Every record overwrites itself under an identity key derived from
//! (user, series, season, episode), so marks are idempotent and caller
//! retries are safe. Three access patterns are served: point lookups on the
//! primary key, per-series listings ordered by season/episode on gsi1, and
//! the global time-ordered history on gsi2.
//!
//! The season and series aggregates read existing state before computing a
//! write delta. That read-then-diff-then-write is deliberately not
//! transactionally isolated: concurrent calls for the same season can both
//! write an episode, but the identity key makes the second write an
//! overwrite (last `watched_at` wins), so the worst case is redundant work,
//! never duplication.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::try_join_all;
use mockable::Clock;
use pagination::{Cursor, Page, PageRequest};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, ImageUrlResolver, StoreConfig};

use super::batch::BatchExecutor;
use super::ids::{SeriesId, UserId};
use super::keys;
use super::metadata::{MetadataError, SeasonSource, SeriesMetadata};
use super::ports::{
    Item, QueryIndex, QueryRequest, SecondaryIndex, SortCondition, SortDirection, StorageEngine,
    StorageEngineError, WriteRequest,
};
use super::watched::{WatchProvider, WatchedEpisode, WatchedEpisodeView};

/// Largest value the 14-digit timestamp sort key can carry; the open end of
/// an unbounded date range.
const MAX_TIMESTAMP_MS: i64 = 99_999_999_999_999;

/// Failures surfaced by the watch-history store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchHistoryError {
    /// The season does not exist, has not aired, or has no aired episodes.
    #[error("season {season_number} of series {series_id} has not aired")]
    InvalidSeason {
        /// Offending series.
        series_id: SeriesId,
        /// Offending season.
        season_number: u16,
    },
    /// The metadata collaborator failed.
    #[error("metadata lookup failed: {message}")]
    Metadata {
        /// Collaborator failure detail.
        message: String,
    },
    /// The storage engine failed.
    #[error("watch history {operation} failed: {message}")]
    Upstream {
        /// The operation that failed.
        operation: &'static str,
        /// Engine failure detail.
        message: String,
    },
    /// A stored record did not deserialise.
    #[error("stored watch record is malformed: {message}")]
    Malformed {
        /// Decoder detail.
        message: String,
    },
}

impl WatchHistoryError {
    /// Helper for season precondition failures.
    pub const fn invalid_season(series_id: SeriesId, season_number: u16) -> Self {
        Self::InvalidSeason {
            series_id,
            season_number,
        }
    }
}

/// Map engine errors to store errors, logging the failing operation.
fn map_engine_error(operation: &'static str, error: StorageEngineError) -> WatchHistoryError {
    debug!(operation, %error, "watch history engine operation failed");
    WatchHistoryError::Upstream {
        operation,
        message: error.to_string(),
    }
}

fn map_metadata_error(error: MetadataError) -> WatchHistoryError {
    debug!(%error, "season metadata lookup failed");
    WatchHistoryError::Metadata {
        message: error.to_string(),
    }
}

/// Input for marking one episode watched.
#[derive(Debug, Clone)]
pub struct MarkWatchedRequest {
    /// The watching user.
    pub user_id: UserId,
    /// Series the episode belongs to.
    pub series_id: SeriesId,
    /// Series display title, denormalised onto the record.
    pub series_title: String,
    /// Relative series poster path.
    pub poster_path: Option<String>,
    /// Season number.
    pub season_number: u16,
    /// Episode number.
    pub episode_number: u16,
    /// Episode title, when known.
    pub episode_title: Option<String>,
    /// Runtime in minutes, when known.
    pub runtime_minutes: Option<u32>,
    /// Relative episode still path.
    pub still_path: Option<String>,
    /// Watch timestamp; `None` takes the current time.
    pub watched_at_ms: Option<i64>,
    /// Watch-provider attribution.
    pub provider: Option<WatchProvider>,
}

/// Optional inclusive bounds on the `watched_at` timestamp of a history
/// query, expressed as a sort-key range condition rather than a post-filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchedAtRange {
    /// Inclusive lower bound, epoch milliseconds.
    pub from_ms: Option<i64>,
    /// Inclusive upper bound, epoch milliseconds.
    pub to_ms: Option<i64>,
}

impl WatchedAtRange {
    fn sort_condition(self) -> SortCondition {
        match (self.from_ms, self.to_ms) {
            (None, None) => SortCondition::Any,
            (from, to) => SortCondition::Between(
                keys::timestamp_sort_key(from.unwrap_or(0)),
                keys::timestamp_sort_key(to.unwrap_or(MAX_TIMESTAMP_MS)),
            ),
        }
    }
}

/// Store service for watched episodes.
#[derive(Clone)]
pub struct WatchHistoryStore {
    engine: Arc<dyn StorageEngine>,
    seasons: Arc<dyn SeasonSource>,
    clock: Arc<dyn Clock>,
    batch: BatchExecutor,
    images: ImageUrlResolver,
    default_page_size: usize,
    max_page_size: usize,
}

impl WatchHistoryStore {
    /// Create a store over the given engine, metadata source and clock.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the configured image base URL is invalid.
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        seasons: Arc<dyn SeasonSource>,
        clock: Arc<dyn Clock>,
        config: &StoreConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            batch: BatchExecutor::new(engine.clone()),
            engine,
            seasons,
            clock,
            images: config.image_resolver()?,
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        })
    }

    fn now_ms(&self) -> i64 {
        self.clock.utc().timestamp_millis()
    }

    /// Record one watched episode. Marking the same episode again overwrites
    /// the existing record, with the newer `watched_at` winning.
    ///
    /// # Errors
    /// Returns [`WatchHistoryError::Upstream`] when the engine write fails.
    pub async fn mark_watched(
        &self,
        request: MarkWatchedRequest,
    ) -> Result<WatchedEpisode, WatchHistoryError> {
        let record = self.record_from_request(request);
        let item = watched_item(&record)?;
        self.engine
            .put(item)
            .await
            .map_err(|error| map_engine_error("mark", error))?;
        Ok(record)
    }

    /// Record many watched episodes in one call.
    ///
    /// Entries sharing an identity key are a caller bug; the first entry for
    /// a key wins and later duplicates are dropped (unlike the generic batch
    /// executor, which is last-wins).
    ///
    /// # Errors
    /// Returns [`WatchHistoryError::Upstream`] when any batch chunk fails;
    /// committed chunks stay committed.
    pub async fn mark_watched_batch(
        &self,
        records: Vec<WatchedEpisode>,
    ) -> Result<(), WatchHistoryError> {
        let mut seen = HashSet::new();
        let mut puts = Vec::with_capacity(records.len());
        for record in records {
            if !seen.insert(record.identity_key()) {
                continue;
            }
            puts.push(WriteRequest::Put(watched_item(&record)?));
        }
        self.batch
            .execute(puts)
            .await
            .map_err(|error| map_engine_error("batch mark", error))
    }

    /// Mark every aired episode of a season watched.
    ///
    /// Reads the season from the metadata collaborator, rejects seasons that
    /// have not aired or have no aired episodes, queries what is already
    /// watched, writes only the difference and returns the union. Existing
    /// records keep their original `watched_at`.
    ///
    /// # Errors
    /// Returns [`WatchHistoryError::InvalidSeason`] for unaired or unknown
    /// seasons, [`WatchHistoryError::Metadata`] when the collaborator fails
    /// and [`WatchHistoryError::Upstream`] when the engine fails.
    pub async fn mark_season_watched(
        &self,
        user: &UserId,
        series: &SeriesMetadata,
        season_number: u16,
        provider: Option<WatchProvider>,
    ) -> Result<Vec<WatchedEpisode>, WatchHistoryError> {
        let today = self.clock.utc().date_naive();
        let season = self
            .seasons
            .fetch_season(series.id, season_number)
            .await
            .map_err(map_metadata_error)?
            .ok_or_else(|| WatchHistoryError::invalid_season(series.id, season_number))?;

        if !season.has_started_airing(today) {
            return Err(WatchHistoryError::invalid_season(series.id, season_number));
        }
        let aired = season.aired_episodes(today);
        if aired.is_empty() {
            return Err(WatchHistoryError::invalid_season(series.id, season_number));
        }

        let mut existing = self
            .collect_watched(
                keys::watched_series_partition(user, series.id),
                SortCondition::BeginsWith(keys::season_sort_prefix(season_number)),
            )
            .await?;
        let already_watched: HashSet<u16> =
            existing.iter().map(|record| record.episode_number).collect();

        let watched_at_ms = self.now_ms();
        let delta: Vec<WatchedEpisode> = aired
            .into_iter()
            .filter(|episode| !already_watched.contains(&episode.episode_number))
            .map(|episode| WatchedEpisode {
                user_id: user.clone(),
                series_id: series.id,
                season_number,
                episode_number: episode.episode_number,
                watched_at_ms,
                runtime_minutes: episode.runtime_minutes,
                episode_title: episode.title.clone(),
                series_title: series.title.clone(),
                poster_path: series.poster_path.clone(),
                still_path: episode.still_path.clone(),
                provider: provider.clone(),
            })
            .collect();

        debug!(
            user = %user,
            series = %series.id,
            season = season_number,
            existing = existing.len(),
            added = delta.len(),
            "marking season watched"
        );

        if !delta.is_empty() {
            let puts = delta
                .iter()
                .map(|record| Ok(WriteRequest::Put(watched_item(record)?)))
                .collect::<Result<Vec<_>, WatchHistoryError>>()?;
            self.batch
                .execute(puts)
                .await
                .map_err(|error| map_engine_error("mark season", error))?;
        }

        existing.extend(delta);
        existing.sort_by_key(|record| record.episode_number);
        Ok(existing)
    }

    /// Mark every aired season of a series watched, concurrently. The
    /// specials season (number 0) is excluded from the fan-out.
    ///
    /// # Errors
    /// Propagates the first failing season's error; other seasons may have
    /// already committed.
    pub async fn mark_series_watched(
        &self,
        user: &UserId,
        series: &SeriesMetadata,
        provider: Option<WatchProvider>,
    ) -> Result<Vec<WatchedEpisode>, WatchHistoryError> {
        let today = self.clock.utc().date_naive();
        let season_results = try_join_all(
            series
                .aired_season_numbers(today)
                .into_iter()
                .map(|season_number| {
                    self.mark_season_watched(user, series, season_number, provider.clone())
                }),
        )
        .await?;
        Ok(season_results.into_iter().flatten().collect())
    }

    /// Remove one watched episode; removing an absent record is a no-op.
    ///
    /// # Errors
    /// Returns [`WatchHistoryError::Upstream`] when the engine fails.
    pub async fn unmark_watched(
        &self,
        user: &UserId,
        series_id: SeriesId,
        season_number: u16,
        episode_number: u16,
    ) -> Result<(), WatchHistoryError> {
        let key = keys::watched_episode_key(user, series_id, season_number, episode_number);
        self.engine
            .delete(&key)
            .await
            .map_err(|error| map_engine_error("unmark", error))
    }

    /// Remove every watched record of one season: queries the existing
    /// records and deletes exactly those keys, never a blind range delete.
    ///
    /// # Errors
    /// Returns [`WatchHistoryError::Upstream`] when the engine fails.
    pub async fn unmark_season_watched(
        &self,
        user: &UserId,
        series_id: SeriesId,
        season_number: u16,
    ) -> Result<(), WatchHistoryError> {
        let existing = self
            .collect_watched(
                keys::watched_series_partition(user, series_id),
                SortCondition::BeginsWith(keys::season_sort_prefix(season_number)),
            )
            .await?;
        self.delete_records(existing, "unmark season").await
    }

    /// Remove every watched record of a whole series.
    ///
    /// # Errors
    /// Returns [`WatchHistoryError::Upstream`] when the engine fails.
    pub async fn unmark_series_watched(
        &self,
        user: &UserId,
        series_id: SeriesId,
    ) -> Result<(), WatchHistoryError> {
        let existing = self
            .collect_watched(
                keys::watched_series_partition(user, series_id),
                SortCondition::Any,
            )
            .await?;
        self.delete_records(existing, "unmark series").await
    }

    /// Paginated per-series history, ordered by season and episode.
    ///
    /// # Errors
    /// Returns [`WatchHistoryError::Upstream`] when the engine fails and
    /// [`WatchHistoryError::Malformed`] when a stored record does not decode.
    pub async fn get_watched_for_tv_series(
        &self,
        user: &UserId,
        series_id: SeriesId,
        page: &PageRequest,
    ) -> Result<Page<WatchedEpisodeView>, WatchHistoryError> {
        self.query_page(
            QueryRequest::new(
                QueryIndex::Secondary(SecondaryIndex::Gsi1),
                keys::watched_series_partition(user, series_id),
            ),
            page,
            "series history",
        )
        .await
    }

    /// Paginated global history across all series, newest first, optionally
    /// bounded by a `watched_at` range.
    ///
    /// # Errors
    /// Returns [`WatchHistoryError::Upstream`] when the engine fails and
    /// [`WatchHistoryError::Malformed`] when a stored record does not decode.
    pub async fn get_watched(
        &self,
        user: &UserId,
        range: WatchedAtRange,
        page: &PageRequest,
    ) -> Result<Page<WatchedEpisodeView>, WatchHistoryError> {
        self.query_page(
            QueryRequest::new(
                QueryIndex::Secondary(SecondaryIndex::Gsi2),
                keys::watched_time_partition(user),
            )
            .sort(range.sort_condition())
            .direction(SortDirection::Descending),
            page,
            "history",
        )
        .await
    }

    /// Count of watched episodes across all series, optionally bounded by a
    /// `watched_at` range. Uses the engine's native count aggregation.
    ///
    /// # Errors
    /// Returns [`WatchHistoryError::Upstream`] when the engine fails.
    pub async fn get_watched_count(
        &self,
        user: &UserId,
        range: WatchedAtRange,
    ) -> Result<u64, WatchHistoryError> {
        self.engine
            .count(
                QueryRequest::new(
                    QueryIndex::Secondary(SecondaryIndex::Gsi2),
                    keys::watched_time_partition(user),
                )
                .sort(range.sort_condition()),
            )
            .await
            .map_err(|error| map_engine_error("history count", error))
    }

    /// Count of watched episodes for one series.
    ///
    /// # Errors
    /// Returns [`WatchHistoryError::Upstream`] when the engine fails.
    pub async fn get_watched_count_for_tv_series(
        &self,
        user: &UserId,
        series_id: SeriesId,
    ) -> Result<u64, WatchHistoryError> {
        self.engine
            .count(QueryRequest::new(
                QueryIndex::Secondary(SecondaryIndex::Gsi1),
                keys::watched_series_partition(user, series_id),
            ))
            .await
            .map_err(|error| map_engine_error("series count", error))
    }

    /// Point existence check on the primary key.
    ///
    /// # Errors
    /// Returns [`WatchHistoryError::Upstream`] when the engine fails.
    pub async fn is_watched(
        &self,
        user: &UserId,
        series_id: SeriesId,
        season_number: u16,
        episode_number: u16,
    ) -> Result<bool, WatchHistoryError> {
        let key = keys::watched_episode_key(user, series_id, season_number, episode_number);
        Ok(self
            .engine
            .get(&key)
            .await
            .map_err(|error| map_engine_error("lookup", error))?
            .is_some())
    }

    fn record_from_request(&self, request: MarkWatchedRequest) -> WatchedEpisode {
        let watched_at_ms = request.watched_at_ms.unwrap_or_else(|| self.now_ms());
        WatchedEpisode {
            user_id: request.user_id,
            series_id: request.series_id,
            season_number: request.season_number,
            episode_number: request.episode_number,
            watched_at_ms,
            runtime_minutes: request.runtime_minutes,
            episode_title: request.episode_title,
            series_title: request.series_title,
            poster_path: request.poster_path,
            still_path: request.still_path,
            provider: request.provider,
        }
    }

    /// Fetch every record in one gsi1 partition matching `sort`, looping at
    /// the bulk page cap until the engine stops returning a resume key.
    async fn collect_watched(
        &self,
        partition: String,
        sort: SortCondition,
    ) -> Result<Vec<WatchedEpisode>, WatchHistoryError> {
        let mut records = Vec::new();
        let mut start_key = None;
        loop {
            let page = self
                .engine
                .query(
                    QueryRequest::new(
                        QueryIndex::Secondary(SecondaryIndex::Gsi1),
                        partition.clone(),
                    )
                    .sort(sort.clone())
                    .limit(pagination::MAX_PAGE_SIZE)
                    .start_after(start_key.take()),
                )
                .await
                .map_err(|error| map_engine_error("collect", error))?;
            for item in page.items {
                records.push(record_from_item(item)?);
            }
            match page.last_key {
                Some(key) => start_key = Some(key),
                None => return Ok(records),
            }
        }
    }

    async fn delete_records(
        &self,
        records: Vec<WatchedEpisode>,
        operation: &'static str,
    ) -> Result<(), WatchHistoryError> {
        let deletes = records
            .into_iter()
            .map(|record| WriteRequest::Delete(record.identity_key()))
            .collect();
        self.batch
            .execute(deletes)
            .await
            .map_err(|error| map_engine_error(operation, error))
    }

    async fn query_page(
        &self,
        request: QueryRequest,
        page: &PageRequest,
        operation: &'static str,
    ) -> Result<Page<WatchedEpisodeView>, WatchHistoryError> {
        let limit = page.resolve_limit(self.default_page_size, self.max_page_size);
        let start_key = page.cursor.clone().map(Cursor::into_position);
        let result = self
            .engine
            .query(request.limit(limit).start_after(start_key))
            .await
            .map_err(|error| map_engine_error(operation, error))?;

        let mut items = Vec::with_capacity(result.items.len());
        for item in result.items {
            let record = record_from_item(item)?;
            items.push(WatchedEpisodeView::resolve(record, &self.images));
        }
        Ok(Page {
            items,
            next_cursor: result.last_key.map(Cursor::from_position),
        })
    }
}

/// Serialise a record into an engine item with its key projections.
fn watched_item(record: &WatchedEpisode) -> Result<Item, WatchHistoryError> {
    let value = serde_json::to_value(record).map_err(|error| WatchHistoryError::Malformed {
        message: error.to_string(),
    })?;
    let Value::Object(mut item) = value else {
        return Err(WatchHistoryError::Malformed {
            message: "watched record did not serialise to an object".to_owned(),
        });
    };

    let key = record.identity_key();
    item.insert("pk".to_owned(), Value::String(key.partition));
    item.insert("sk".to_owned(), Value::String(key.sort));
    item.insert(
        "gsi1pk".to_owned(),
        Value::String(keys::watched_series_partition(
            &record.user_id,
            record.series_id,
        )),
    );
    item.insert(
        "gsi1sk".to_owned(),
        Value::String(keys::episode_sort_key(
            record.season_number,
            record.episode_number,
        )),
    );
    item.insert(
        "gsi2pk".to_owned(),
        Value::String(keys::watched_time_partition(&record.user_id)),
    );
    item.insert(
        "gsi2sk".to_owned(),
        Value::String(keys::timestamp_sort_key(record.watched_at_ms)),
    );
    Ok(item)
}

fn record_from_item(item: Item) -> Result<WatchedEpisode, WatchHistoryError> {
    serde_json::from_value(Value::Object(item)).map_err(|error| WatchHistoryError::Malformed {
        message: error.to_string(),
    })
}
