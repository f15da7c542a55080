//! In-memory implementation of the storage engine port.
//!
//! Backs tests and local development with the same contract the production
//! engine offers: composite primary keys, four secondary index projections,
//! range conditions, resumable pagination, counts, conditional puts and the
//! batch limits. Unlike the remote engine, reads here are strongly
//! consistent on every index.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::ports::{
    item_key_of, Item, ItemKey, LastKey, MAX_BATCH_GET_ITEMS,
    MAX_BATCH_WRITE_ITEMS, Precondition, QueryIndex, QueryPage, QueryRequest, SortDirection,
    StorageEngine, StorageEngineError, WriteRequest, PARTITION_KEY_ATTRIBUTE, SORT_KEY_ATTRIBUTE,
};

/// Traversal position of one item on one index: the index sort value with
/// the primary key as a stable tie-break.
type Position = (String, String, String);

/// In-memory storage engine over a single ordered table.
#[derive(Debug, Default)]
pub struct MemoryStorageEngine {
    items: Mutex<BTreeMap<(String, String), Item>>,
}

impl MemoryStorageEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, BTreeMap<(String, String), Item>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Collect matching items in traversal order for one query.
    fn traversal(&self, request: &QueryRequest) -> Vec<(Position, Item)> {
        let guard = self.guard();
        let mut matches: Vec<(Position, Item)> = guard
            .iter()
            .filter_map(|((partition, sort), item)| {
                let partition_value = match request.index {
                    QueryIndex::Primary => Some(partition.clone()),
                    QueryIndex::Secondary(index) => item
                        .get(index.partition_attribute())
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_owned),
                };
                if partition_value.as_deref() != Some(request.partition.as_str()) {
                    return None;
                }

                let sort_value = match request.index {
                    QueryIndex::Primary => Some(sort.clone()),
                    QueryIndex::Secondary(index) => item
                        .get(index.sort_attribute())
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_owned),
                }?;
                if !request.sort.matches(&sort_value) {
                    return None;
                }

                Some((
                    (sort_value, partition.clone(), sort.clone()),
                    item.clone(),
                ))
            })
            .collect();

        matches.sort_by(|(a, _), (b, _)| a.cmp(b));
        if request.direction == SortDirection::Descending {
            matches.reverse();
        }
        matches
    }
}

/// Reconstruct the traversal position encoded in a resume key.
fn start_position(
    index: QueryIndex,
    start_key: &LastKey,
) -> Result<Position, StorageEngineError> {
    let read = |name: &str| {
        start_key
            .get(name)
            .cloned()
            .ok_or_else(|| StorageEngineError::malformed(format!("resume key lacks `{name}`")))
    };
    Ok((
        read(index.sort_attribute())?,
        read(PARTITION_KEY_ATTRIBUTE)?,
        read(SORT_KEY_ATTRIBUTE)?,
    ))
}

/// Build the resume key describing the last evaluated item.
fn last_key_of(index: QueryIndex, position: &Position, item: &Item) -> LastKey {
    let (sort_value, partition, sort) = position;
    let mut key = LastKey::new();
    key.insert(PARTITION_KEY_ATTRIBUTE.to_owned(), partition.clone());
    key.insert(SORT_KEY_ATTRIBUTE.to_owned(), sort.clone());
    if let QueryIndex::Secondary(secondary) = index {
        if let Some(value) = item
            .get(secondary.partition_attribute())
            .and_then(serde_json::Value::as_str)
        {
            key.insert(secondary.partition_attribute().to_owned(), value.to_owned());
        }
        key.insert(secondary.sort_attribute().to_owned(), sort_value.clone());
    }
    key
}

/// Whether `position` lies at or before `start` in traversal order.
fn not_yet_past(position: &Position, start: &Position, direction: SortDirection) -> bool {
    match direction {
        SortDirection::Ascending => position <= start,
        SortDirection::Descending => position >= start,
    }
}

fn evaluate_condition(
    stored: Option<&Item>,
    condition: &Precondition,
) -> Result<(), StorageEngineError> {
    match condition {
        Precondition::AttributeMissing(name) => {
            if stored.is_some_and(|item| item.contains_key(name)) {
                return Err(StorageEngineError::condition_failed(format!(
                    "attribute `{name}` already present"
                )));
            }
        }
        Precondition::AttributeEquals(name, expected) => {
            let actual = stored.and_then(|item| item.get(name));
            if actual != Some(expected) {
                return Err(StorageEngineError::condition_failed(format!(
                    "attribute `{name}` changed since last read"
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl StorageEngine for MemoryStorageEngine {
    async fn put(&self, item: Item) -> Result<(), StorageEngineError> {
        let key = item_key_of(&item)?;
        self.guard().insert((key.partition, key.sort), item);
        Ok(())
    }

    async fn put_conditional(
        &self,
        item: Item,
        condition: Precondition,
    ) -> Result<(), StorageEngineError> {
        let key = item_key_of(&item)?;
        let mut guard = self.guard();
        let slot = (key.partition, key.sort);
        evaluate_condition(guard.get(&slot), &condition)?;
        guard.insert(slot, item);
        Ok(())
    }

    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StorageEngineError> {
        Ok(self
            .guard()
            .get(&(key.partition.clone(), key.sort.clone()))
            .cloned())
    }

    async fn delete(&self, key: &ItemKey) -> Result<(), StorageEngineError> {
        self.guard()
            .remove(&(key.partition.clone(), key.sort.clone()));
        Ok(())
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryPage, StorageEngineError> {
        let mut entries = self.traversal(&request);

        if let Some(start_key) = &request.start_key {
            let start = start_position(request.index, start_key)?;
            entries.retain(|(position, _)| !not_yet_past(position, &start, request.direction));
        }

        let remaining = entries.len();
        let mut page_items = Vec::with_capacity(request.limit.min(remaining));
        let mut last_position: Option<(Position, Item)> = None;
        for (position, item) in entries.into_iter().take(request.limit) {
            page_items.push(item.clone());
            last_position = Some((position, item));
        }

        let last_key = if remaining > request.limit {
            last_position.map(|(position, item)| last_key_of(request.index, &position, &item))
        } else {
            None
        };

        Ok(QueryPage {
            items: page_items,
            last_key,
        })
    }

    async fn count(&self, request: QueryRequest) -> Result<u64, StorageEngineError> {
        Ok(self.traversal(&request).len() as u64)
    }

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> Result<(), StorageEngineError> {
        if requests.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(StorageEngineError::BatchTooLarge {
                size: requests.len(),
                limit: MAX_BATCH_WRITE_ITEMS,
            });
        }
        // Validate every item before mutating so a malformed request leaves
        // the table untouched, matching the engine's all-or-nothing batches.
        let mut validated = Vec::with_capacity(requests.len());
        for request in requests {
            let key = match &request {
                WriteRequest::Put(item) => item_key_of(item)?,
                WriteRequest::Delete(key) => key.clone(),
            };
            validated.push((key, request));
        }

        let mut guard = self.guard();
        for (key, request) in validated {
            let slot = (key.partition, key.sort);
            match request {
                WriteRequest::Put(item) => {
                    guard.insert(slot, item);
                }
                WriteRequest::Delete(_) => {
                    guard.remove(&slot);
                }
            }
        }
        Ok(())
    }

    async fn batch_get(&self, keys: Vec<ItemKey>) -> Result<Vec<Item>, StorageEngineError> {
        if keys.len() > MAX_BATCH_GET_ITEMS {
            return Err(StorageEngineError::BatchTooLarge {
                size: keys.len(),
                limit: MAX_BATCH_GET_ITEMS,
            });
        }
        let guard = self.guard();
        Ok(keys
            .into_iter()
            .filter_map(|key| guard.get(&(key.partition, key.sort)).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    //! Contract coverage: index queries, pagination, conditions and limits.

    use rstest::rstest;
    use serde_json::json;

    use crate::domain::ports::{string_attribute, SecondaryIndex, SortCondition};

    use super::*;

    fn item(partition: &str, sort: &str, extra: &[(&str, &str)]) -> Item {
        let mut item = Item::new();
        item.insert("pk".to_owned(), json!(partition));
        item.insert("sk".to_owned(), json!(sort));
        for (name, value) in extra {
            item.insert((*name).to_owned(), json!(value));
        }
        item
    }

    async fn seeded_engine() -> MemoryStorageEngine {
        let engine = MemoryStorageEngine::new();
        for n in 1..=5_u16 {
            engine
                .put(item(
                    "USER#u1",
                    &format!("WATCHED#42#S001#E{n:03}"),
                    &[
                        ("gsi1pk", "USER#u1#WATCHED#42"),
                        ("gsi1sk", &format!("S001#E{n:03}")),
                    ],
                ))
                .await
                .expect("seed put");
        }
        engine
    }

    #[tokio::test]
    async fn point_get_round_trips() {
        let engine = MemoryStorageEngine::new();
        let stored = item("USER#u1", "PROFILE", &[("name", "Ada")]);
        engine.put(stored.clone()).await.expect("put");

        let fetched = engine
            .get(&ItemKey::new("USER#u1", "PROFILE"))
            .await
            .expect("get");
        assert_eq!(fetched, Some(stored));

        engine
            .delete(&ItemKey::new("USER#u1", "PROFILE"))
            .await
            .expect("delete");
        let gone = engine
            .get(&ItemKey::new("USER#u1", "PROFILE"))
            .await
            .expect("get after delete");
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn begins_with_matches_one_season() {
        let engine = seeded_engine().await;
        engine
            .put(item(
                "USER#u1",
                "WATCHED#42#S002#E001",
                &[
                    ("gsi1pk", "USER#u1#WATCHED#42"),
                    ("gsi1sk", "S002#E001"),
                ],
            ))
            .await
            .expect("seed put");

        let page = engine
            .query(
                QueryRequest::new(
                    QueryIndex::Secondary(SecondaryIndex::Gsi1),
                    "USER#u1#WATCHED#42",
                )
                .sort(SortCondition::BeginsWith("S001#".to_owned())),
            )
            .await
            .expect("query");
        assert_eq!(page.items.len(), 5);
        assert!(page.last_key.is_none());
    }

    #[tokio::test]
    async fn pagination_resumes_without_gaps_or_duplicates() {
        let engine = seeded_engine().await;
        let base = QueryRequest::new(
            QueryIndex::Secondary(SecondaryIndex::Gsi1),
            "USER#u1#WATCHED#42",
        )
        .limit(2);

        let mut seen = Vec::new();
        let mut start_key = None;
        loop {
            let page = engine
                .query(base.clone().start_after(start_key.take()))
                .await
                .expect("query");
            for row in &page.items {
                seen.push(string_attribute(row, "sk").expect("sk"));
            }
            match page.last_key {
                Some(key) => start_key = Some(key),
                None => break,
            }
        }

        let expected: Vec<String> = (1..=5_u16)
            .map(|n| format!("WATCHED#42#S001#E{n:03}"))
            .collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn descending_traversal_reverses_order() {
        let engine = seeded_engine().await;
        let page = engine
            .query(
                QueryRequest::new(
                    QueryIndex::Secondary(SecondaryIndex::Gsi1),
                    "USER#u1#WATCHED#42",
                )
                .direction(SortDirection::Descending)
                .limit(2),
            )
            .await
            .expect("query");

        let sorts: Vec<String> = page
            .items
            .iter()
            .map(|row| string_attribute(row, "gsi1sk").expect("gsi1sk"))
            .collect();
        assert_eq!(sorts, vec!["S001#E005", "S001#E004"]);
        assert!(page.last_key.is_some());
    }

    #[tokio::test]
    async fn count_matches_condition() {
        let engine = seeded_engine().await;
        let count = engine
            .count(
                QueryRequest::new(
                    QueryIndex::Secondary(SecondaryIndex::Gsi1),
                    "USER#u1#WATCHED#42",
                )
                .sort(SortCondition::Between(
                    "S001#E002".to_owned(),
                    "S001#E004".to_owned(),
                )),
            )
            .await
            .expect("count");
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn conditional_put_enforces_watermarks() {
        let engine = MemoryStorageEngine::new();
        let first = item("USER#u1", "PROFILE", &[("updated_at_ms", "100")]);
        engine
            .put_conditional(
                first,
                Precondition::AttributeMissing("updated_at_ms".to_owned()),
            )
            .await
            .expect("first write against empty slot");

        // A second create-style write must now fail.
        let error = engine
            .put_conditional(
                item("USER#u1", "PROFILE", &[("updated_at_ms", "200")]),
                Precondition::AttributeMissing("updated_at_ms".to_owned()),
            )
            .await
            .expect_err("missing-attribute assertion fails");
        assert!(matches!(error, StorageEngineError::ConditionFailed { .. }));

        // Asserting the stored watermark succeeds exactly once.
        engine
            .put_conditional(
                item("USER#u1", "PROFILE", &[("updated_at_ms", "200")]),
                Precondition::AttributeEquals("updated_at_ms".to_owned(), json!("100")),
            )
            .await
            .expect("matching watermark accepted");
        let error = engine
            .put_conditional(
                item("USER#u1", "PROFILE", &[("updated_at_ms", "300")]),
                Precondition::AttributeEquals("updated_at_ms".to_owned(), json!("100")),
            )
            .await
            .expect_err("stale watermark rejected");
        assert!(matches!(error, StorageEngineError::ConditionFailed { .. }));
    }

    #[rstest]
    #[case(26)]
    #[case(40)]
    #[tokio::test]
    async fn oversized_batches_are_rejected(#[case] size: usize) {
        let engine = MemoryStorageEngine::new();
        let requests = (0..size)
            .map(|n| WriteRequest::Delete(ItemKey::new("USER#u1", format!("ITEM#{n}"))))
            .collect();

        let error = engine
            .batch_write(requests)
            .await
            .expect_err("oversized batch rejected");
        assert!(matches!(error, StorageEngineError::BatchTooLarge { .. }));
    }

    #[tokio::test]
    async fn batch_get_skips_absent_keys() {
        let engine = seeded_engine().await;
        let items = engine
            .batch_get(vec![
                ItemKey::new("USER#u1", "WATCHED#42#S001#E001"),
                ItemKey::new("USER#u1", "WATCHED#42#S009#E001"),
            ])
            .await
            .expect("batch get");
        assert_eq!(items.len(), 1);
    }
}
