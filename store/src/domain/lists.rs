//! List store: watchlist, favourites and custom-list memberships.
//!
//! A membership overwrites itself under a (user, list, series) identity key,
//! so adding a series twice keeps one record. Three orderings are projected
//! onto secondary indexes: creation time on gsi1, lower-cased title on gsi2
//! and manual position on gsi3. The position index is only written for
//! custom lists; built-in lists fall back to the date ordering when asked to
//! sort by position.

use std::sync::Arc;

use mockable::Clock;
use pagination::{Cursor, Page, PageRequest};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, ImageUrlResolver, StoreConfig};

use super::ids::{ListId, SeriesId, UserId};
use super::keys;
use super::list::{ListItem, ListItemView, ListSort};
use super::ports::{
    Item, QueryIndex, QueryRequest, SecondaryIndex, SortDirection, StorageEngine,
    StorageEngineError,
};

/// Failures surfaced by the list store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListError {
    /// The storage engine failed.
    #[error("list {operation} failed: {message}")]
    Upstream {
        /// The operation that failed.
        operation: &'static str,
        /// Engine failure detail.
        message: String,
    },
    /// A stored record did not deserialise.
    #[error("stored list item is malformed: {message}")]
    Malformed {
        /// Decoder detail.
        message: String,
    },
}

fn map_engine_error(operation: &'static str, error: StorageEngineError) -> ListError {
    debug!(operation, %error, "list engine operation failed");
    ListError::Upstream {
        operation,
        message: error.to_string(),
    }
}

/// Input for adding one series to a list.
#[derive(Debug, Clone)]
pub struct AddToListRequest {
    /// Owning user.
    pub user_id: UserId,
    /// The series to add.
    pub series_id: SeriesId,
    /// Series display title.
    pub title: String,
    /// URL slug for the series page.
    pub slug: Option<String>,
    /// Airing status at the time of adding.
    pub status: Option<String>,
    /// Relative poster path.
    pub poster_path: Option<String>,
    /// Manual ordering position; honoured only on custom lists.
    pub position: Option<u32>,
}

/// Store service for list memberships.
#[derive(Clone)]
pub struct ListStore {
    engine: Arc<dyn StorageEngine>,
    clock: Arc<dyn Clock>,
    images: ImageUrlResolver,
    default_page_size: usize,
    max_page_size: usize,
}

impl ListStore {
    /// Create a store over the given engine and clock.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the configured image base URL is invalid.
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        clock: Arc<dyn Clock>,
        config: &StoreConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            engine,
            clock,
            images: config.image_resolver()?,
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        })
    }

    /// Add a series to a list. Adding it again overwrites the membership,
    /// refreshing the stored metadata and creation time.
    ///
    /// # Errors
    /// Returns [`ListError::Upstream`] when the engine write fails.
    pub async fn add_to_list(
        &self,
        list: &ListId,
        request: AddToListRequest,
    ) -> Result<ListItem, ListError> {
        let record = ListItem {
            user_id: request.user_id,
            list_id: list.clone(),
            series_id: request.series_id,
            title: request.title,
            slug: request.slug,
            status: request.status,
            poster_path: request.poster_path,
            created_at_ms: self.clock.utc().timestamp_millis(),
            // Manual positions only exist on custom lists.
            position: request.position.filter(|_| list.is_custom()),
        };
        let item = list_item(&record)?;
        self.engine
            .put(item)
            .await
            .map_err(|error| map_engine_error("add", error))?;
        Ok(record)
    }

    /// Remove a series from a list; removing an absent membership is a
    /// no-op.
    ///
    /// # Errors
    /// Returns [`ListError::Upstream`] when the engine fails.
    pub async fn remove_from_list(
        &self,
        user: &UserId,
        list: &ListId,
        series_id: SeriesId,
    ) -> Result<(), ListError> {
        let key = keys::list_item_key(user, list, series_id);
        self.engine
            .delete(&key)
            .await
            .map_err(|error| map_engine_error("remove", error))
    }

    /// Point membership check on the primary key.
    ///
    /// # Errors
    /// Returns [`ListError::Upstream`] when the engine fails.
    pub async fn is_in_list(
        &self,
        user: &UserId,
        list: &ListId,
        series_id: SeriesId,
    ) -> Result<bool, ListError> {
        let key = keys::list_item_key(user, list, series_id);
        Ok(self
            .engine
            .get(&key)
            .await
            .map_err(|error| map_engine_error("lookup", error))?
            .is_some())
    }

    /// One page of a list in the requested ordering. Date ordering is
    /// newest first; title and position orderings are ascending.
    ///
    /// # Errors
    /// Returns [`ListError::Upstream`] when the engine fails and
    /// [`ListError::Malformed`] when a stored record does not decode.
    pub async fn get_list_items(
        &self,
        user: &UserId,
        list: &ListId,
        sort: ListSort,
        page: &PageRequest,
    ) -> Result<Page<ListItemView>, ListError> {
        let limit = page.resolve_limit(self.default_page_size, self.max_page_size);
        let start_key = page.cursor.clone().map(Cursor::into_position);
        let result = self
            .engine
            .query(
                query_for_sort(user, list, sort)
                    .limit(limit)
                    .start_after(start_key),
            )
            .await
            .map_err(|error| map_engine_error("page", error))?;

        let mut items = Vec::with_capacity(result.items.len());
        for item in result.items {
            items.push(ListItemView::resolve(record_from_item(item)?, &self.images));
        }
        Ok(Page {
            items,
            next_cursor: result.last_key.map(Cursor::from_position),
        })
    }

    /// Every item on a list, looping at the bulk page cap until the engine
    /// stops returning a resume key.
    ///
    /// # Errors
    /// Returns [`ListError::Upstream`] when the engine fails and
    /// [`ListError::Malformed`] when a stored record does not decode.
    pub async fn get_all_list_items(
        &self,
        user: &UserId,
        list: &ListId,
        sort: ListSort,
    ) -> Result<Vec<ListItem>, ListError> {
        let mut records = Vec::new();
        let mut start_key = None;
        loop {
            let page = self
                .engine
                .query(
                    query_for_sort(user, list, sort)
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

    /// Count of items on a list.
    ///
    /// # Errors
    /// Returns [`ListError::Upstream`] when the engine fails.
    pub async fn get_list_items_count(
        &self,
        user: &UserId,
        list: &ListId,
    ) -> Result<u64, ListError> {
        self.engine
            .count(QueryRequest::new(
                QueryIndex::Primary,
                keys::list_partition(user, list),
            ))
            .await
            .map_err(|error| map_engine_error("count", error))
    }

    /// Add a series to the built-in watchlist.
    ///
    /// # Errors
    /// Returns [`ListError::Upstream`] when the engine write fails.
    pub async fn add_to_watchlist(&self, request: AddToListRequest) -> Result<ListItem, ListError> {
        self.add_to_list(&ListId::Watchlist, request).await
    }

    /// Remove a series from the built-in watchlist.
    ///
    /// # Errors
    /// Returns [`ListError::Upstream`] when the engine fails.
    pub async fn remove_from_watchlist(
        &self,
        user: &UserId,
        series_id: SeriesId,
    ) -> Result<(), ListError> {
        self.remove_from_list(user, &ListId::Watchlist, series_id)
            .await
    }

    /// Add a series to the built-in favourites list.
    ///
    /// # Errors
    /// Returns [`ListError::Upstream`] when the engine write fails.
    pub async fn add_to_favorites(&self, request: AddToListRequest) -> Result<ListItem, ListError> {
        self.add_to_list(&ListId::Favorites, request).await
    }

    /// Remove a series from the built-in favourites list.
    ///
    /// # Errors
    /// Returns [`ListError::Upstream`] when the engine fails.
    pub async fn remove_from_favorites(
        &self,
        user: &UserId,
        series_id: SeriesId,
    ) -> Result<(), ListError> {
        self.remove_from_list(user, &ListId::Favorites, series_id)
            .await
    }
}

/// Index and direction backing one sort mode. Position ordering on a
/// built-in list silently falls back to the date index.
fn query_for_sort(user: &UserId, list: &ListId, sort: ListSort) -> QueryRequest {
    let partition = keys::list_partition(user, list);
    match sort {
        ListSort::Title => QueryRequest::new(
            QueryIndex::Secondary(SecondaryIndex::Gsi2),
            partition,
        ),
        ListSort::Position if list.is_custom() => QueryRequest::new(
            QueryIndex::Secondary(SecondaryIndex::Gsi3),
            partition,
        ),
        ListSort::CreatedAt | ListSort::Position => QueryRequest::new(
            QueryIndex::Secondary(SecondaryIndex::Gsi1),
            partition,
        )
        .direction(SortDirection::Descending),
    }
}

/// Serialise a membership into an engine item with its key projections.
fn list_item(record: &ListItem) -> Result<Item, ListError> {
    let value = serde_json::to_value(record).map_err(|error| ListError::Malformed {
        message: error.to_string(),
    })?;
    let Value::Object(mut item) = value else {
        return Err(ListError::Malformed {
            message: "list item did not serialise to an object".to_owned(),
        });
    };

    let key = record.identity_key();
    let partition = keys::list_partition(&record.user_id, &record.list_id);
    item.insert("pk".to_owned(), Value::String(key.partition));
    item.insert("sk".to_owned(), Value::String(key.sort));
    item.insert("gsi1pk".to_owned(), Value::String(partition.clone()));
    item.insert(
        "gsi1sk".to_owned(),
        Value::String(keys::list_created_sort_key(
            record.created_at_ms,
            record.series_id,
        )),
    );
    item.insert("gsi2pk".to_owned(), Value::String(partition.clone()));
    item.insert(
        "gsi2sk".to_owned(),
        Value::String(record.title_sort_key()),
    );
    if let Some(position) = record.position {
        item.insert("gsi3pk".to_owned(), Value::String(partition));
        item.insert(
            "gsi3sk".to_owned(),
            Value::String(keys::position_sort_key(position)),
        );
    }
    Ok(item)
}

fn record_from_item(item: Item) -> Result<ListItem, ListError> {
    serde_json::from_value(Value::Object(item)).map_err(|error| ListError::Malformed {
        message: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    //! Membership idempotency and the three sort orderings.

    use rstest::{fixture, rstest};

    use crate::domain::ids::CustomListId;
    use crate::outbound::memory::MemoryStorageEngine;
    use crate::test_support::{fixture_now, MutableClock};

    use super::*;

    struct Fixture {
        store: ListStore,
        clock: Arc<MutableClock>,
        user: UserId,
    }

    #[fixture]
    fn fx() -> Fixture {
        let clock = Arc::new(MutableClock::new(fixture_now()));
        let store = ListStore::new(
            Arc::new(MemoryStorageEngine::new()),
            clock.clone(),
            &StoreConfig::default(),
        )
        .expect("valid default config");
        Fixture {
            store,
            clock,
            user: UserId::new("u1").expect("valid id"),
        }
    }

    fn custom_list() -> ListId {
        ListId::Custom(CustomListId::new("scifi").expect("valid id"))
    }

    fn add_request(fx: &Fixture, series: u64, title: &str, position: Option<u32>) -> AddToListRequest {
        AddToListRequest {
            user_id: fx.user.clone(),
            series_id: SeriesId(series),
            title: title.to_owned(),
            slug: None,
            status: Some("Returning Series".to_owned()),
            poster_path: Some("/poster.jpg".to_owned()),
            position,
        }
    }

    async fn titles(fx: &Fixture, list: &ListId, sort: ListSort) -> Vec<String> {
        fx.store
            .get_all_list_items(&fx.user, list, sort)
            .await
            .expect("list items")
            .into_iter()
            .map(|record| record.title)
            .collect()
    }

    #[rstest]
    #[tokio::test]
    async fn repeated_add_keeps_one_membership(fx: Fixture) {
        let list = ListId::Watchlist;
        fx.store
            .add_to_list(&list, add_request(&fx, 42, "Dark", None))
            .await
            .expect("first add");
        fx.store
            .add_to_list(&list, add_request(&fx, 42, "Dark (2017)", None))
            .await
            .expect("second add");

        assert_eq!(
            fx.store
                .get_list_items_count(&fx.user, &list)
                .await
                .expect("count"),
            1
        );
        assert_eq!(titles(&fx, &list, ListSort::CreatedAt).await, vec!["Dark (2017)"]);
    }

    #[rstest]
    #[tokio::test]
    async fn date_ordering_is_newest_first(fx: Fixture) {
        let list = ListId::Watchlist;
        for (series, title) in [(1_u64, "First"), (2, "Second"), (3, "Third")] {
            fx.store
                .add_to_list(&list, add_request(&fx, series, title, None))
                .await
                .expect("add");
            fx.clock.advance_seconds(60);
        }

        assert_eq!(
            titles(&fx, &list, ListSort::CreatedAt).await,
            vec!["Third", "Second", "First"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn title_ordering_is_case_insensitive_alphabetical(fx: Fixture) {
        let list = ListId::Favorites;
        for (series, title) in [(1_u64, "the Wire"), (2, "Andor"), (3, "Dark")] {
            fx.store
                .add_to_list(&list, add_request(&fx, series, title, None))
                .await
                .expect("add");
        }

        assert_eq!(
            titles(&fx, &list, ListSort::Title).await,
            vec!["Andor", "Dark", "the Wire"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn position_ordering_follows_manual_positions(fx: Fixture) {
        let list = custom_list();
        for (series, title, position) in [(1_u64, "X", 3_u32), (2, "Y", 1), (3, "Z", 2)] {
            fx.store
                .add_to_list(&list, add_request(&fx, series, title, Some(position)))
                .await
                .expect("add");
        }

        assert_eq!(
            titles(&fx, &list, ListSort::Position).await,
            vec!["Y", "Z", "X"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn position_sort_on_builtin_list_falls_back_to_date_order(fx: Fixture) {
        let list = ListId::Watchlist;
        for (series, title, position) in [(1_u64, "First", 2_u32), (2, "Second", 1)] {
            fx.store
                .add_to_list(&list, add_request(&fx, series, title, Some(position)))
                .await
                .expect("add");
            fx.clock.advance_seconds(60);
        }

        assert_eq!(
            titles(&fx, &list, ListSort::Position).await,
            vec!["Second", "First"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn remove_is_idempotent_and_scoped_to_one_list(fx: Fixture) {
        fx.store
            .add_to_watchlist(add_request(&fx, 42, "Dark", None))
            .await
            .expect("watchlist add");
        fx.store
            .add_to_favorites(add_request(&fx, 42, "Dark", None))
            .await
            .expect("favourites add");

        fx.store
            .remove_from_watchlist(&fx.user, SeriesId(42))
            .await
            .expect("remove");
        // Removing again is a no-op.
        fx.store
            .remove_from_watchlist(&fx.user, SeriesId(42))
            .await
            .expect("repeat remove");

        assert!(
            !fx.store
                .is_in_list(&fx.user, &ListId::Watchlist, SeriesId(42))
                .await
                .expect("watchlist lookup")
        );
        assert!(
            fx.store
                .is_in_list(&fx.user, &ListId::Favorites, SeriesId(42))
                .await
                .expect("favourites lookup")
        );
    }

    #[rstest]
    #[tokio::test]
    async fn pagination_round_trips_in_sort_order(fx: Fixture) {
        let list = ListId::Watchlist;
        for (series, title) in [(1_u64, "A"), (2, "B"), (3, "C"), (4, "D"), (5, "E")] {
            fx.store
                .add_to_list(&list, add_request(&fx, series, title, None))
                .await
                .expect("add");
        }

        let mut seen = Vec::new();
        let mut request = PageRequest::with_limit(2);
        loop {
            let page = fx
                .store
                .get_list_items(&fx.user, &list, ListSort::Title, &request)
                .await
                .expect("page");
            seen.extend(page.items.into_iter().map(|view| view.item.title));
            match page.next_cursor {
                Some(cursor) => request = PageRequest::after(cursor, Some(2)),
                None => break,
            }
        }
        assert_eq!(seen, vec!["A", "B", "C", "D", "E"]);
    }
}
