//! Driven-side port for the key-value storage engine.
//!
//! The engine is an external service offering atomic single-item operations
//! and index queries over items shaped as plain JSON object maps. Each item
//! carries a composite primary key (`pk`/`sk`) and up to four secondary index
//! projections (`gsi1pk`/`gsi1sk` .. `gsi4pk`/`gsi4sk`) of the same record.
//! Adapters map their failures into [`StorageEngineError`] so the store
//! services never see transport-specific error types.
//!
//! Consistency contract: reads on the primary key observe prior writes;
//! secondary-index reads may lag briefly and are treated as eventually
//! consistent.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A stored record: attribute name to plain JSON value.
pub type Item = serde_json::Map<String, Value>;

/// Engine-native resume position: the key attributes of the last evaluated
/// item, as wrapped by the pagination cursor.
pub type LastKey = BTreeMap<String, String>;

/// Attribute holding the primary partition key.
pub const PARTITION_KEY_ATTRIBUTE: &str = "pk";

/// Attribute holding the primary sort key.
pub const SORT_KEY_ATTRIBUTE: &str = "sk";

/// Hard engine limit on one batch write request.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Hard engine limit on one batch get request.
pub const MAX_BATCH_GET_ITEMS: usize = 100;

/// Named secondary index projections available on every item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecondaryIndex {
    /// First projection.
    Gsi1,
    /// Second projection.
    Gsi2,
    /// Third projection.
    Gsi3,
    /// Fourth projection.
    Gsi4,
}

impl SecondaryIndex {
    /// Attribute carrying this projection's partition key.
    pub const fn partition_attribute(self) -> &'static str {
        match self {
            Self::Gsi1 => "gsi1pk",
            Self::Gsi2 => "gsi2pk",
            Self::Gsi3 => "gsi3pk",
            Self::Gsi4 => "gsi4pk",
        }
    }

    /// Attribute carrying this projection's sort key.
    pub const fn sort_attribute(self) -> &'static str {
        match self {
            Self::Gsi1 => "gsi1sk",
            Self::Gsi2 => "gsi2sk",
            Self::Gsi3 => "gsi3sk",
            Self::Gsi4 => "gsi4sk",
        }
    }
}

/// Index a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIndex {
    /// The table's own pk/sk ordering.
    Primary,
    /// One of the secondary projections.
    Secondary(SecondaryIndex),
}

impl QueryIndex {
    /// Partition-key attribute name for this index.
    pub const fn partition_attribute(self) -> &'static str {
        match self {
            Self::Primary => PARTITION_KEY_ATTRIBUTE,
            Self::Secondary(index) => index.partition_attribute(),
        }
    }

    /// Sort-key attribute name for this index.
    pub const fn sort_attribute(self) -> &'static str {
        match self {
            Self::Primary => SORT_KEY_ATTRIBUTE,
            Self::Secondary(index) => index.sort_attribute(),
        }
    }
}

/// Composite primary key identifying one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    /// Partition key value.
    pub partition: String,
    /// Sort key value.
    pub sort: String,
}

impl ItemKey {
    /// Build a key from partition and sort values.
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

/// Range condition applied to the sort key of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortCondition {
    /// No sort-key constraint.
    Any,
    /// Exact sort-key match.
    Equals(String),
    /// Sort key starts with the given prefix.
    BeginsWith(String),
    /// Sort key within the inclusive range.
    Between(String, String),
}

impl SortCondition {
    /// Whether a sort-key value satisfies this condition.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Equals(expected) => value == expected,
            Self::BeginsWith(prefix) => value.starts_with(prefix.as_str()),
            Self::Between(low, high) => value >= low.as_str() && value <= high.as_str(),
        }
    }
}

/// Traversal direction over the sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Lowest sort key first.
    #[default]
    Ascending,
    /// Highest sort key first.
    Descending,
}

/// One index query: partition equality plus an optional sort-key range.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Index to traverse.
    pub index: QueryIndex,
    /// Required partition-key value.
    pub partition: String,
    /// Sort-key condition.
    pub sort: SortCondition,
    /// Traversal direction.
    pub direction: SortDirection,
    /// Maximum number of items to evaluate.
    pub limit: usize,
    /// Resume position from a previous page.
    pub start_key: Option<LastKey>,
}

impl QueryRequest {
    /// Query a whole partition in ascending order at the bulk page cap.
    pub fn new(index: QueryIndex, partition: impl Into<String>) -> Self {
        Self {
            index,
            partition: partition.into(),
            sort: SortCondition::Any,
            direction: SortDirection::Ascending,
            limit: pagination::MAX_PAGE_SIZE,
            start_key: None,
        }
    }

    /// Constrain the sort key.
    #[must_use]
    pub fn sort(mut self, sort: SortCondition) -> Self {
        self.sort = sort;
        self
    }

    /// Set the traversal direction.
    #[must_use]
    pub const fn direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Set the page limit.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Resume from a previous page's last evaluated key.
    #[must_use]
    pub fn start_after(mut self, start_key: Option<LastKey>) -> Self {
        self.start_key = start_key;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    /// Matching items in traversal order.
    pub items: Vec<Item>,
    /// Resume position when more items remain.
    pub last_key: Option<LastKey>,
}

/// One operation inside a batch write.
#[derive(Debug, Clone)]
pub enum WriteRequest {
    /// Overwrite-put of a full item.
    Put(Item),
    /// Delete by primary key.
    Delete(ItemKey),
}

/// Condition asserted by a conditional put.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The stored item must not carry the named attribute (or not exist).
    AttributeMissing(String),
    /// The stored item must carry the named attribute with this exact value.
    AttributeEquals(String, Value),
}

/// Failures surfaced by storage engine adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageEngineError {
    /// Network, throttling or malformed-request failure in the engine.
    #[error("storage engine request failed: {message}")]
    Backend {
        /// Adapter failure detail.
        message: String,
    },
    /// A conditional write found the asserted state changed.
    #[error("conditional write rejected: {message}")]
    ConditionFailed {
        /// Which assertion failed.
        message: String,
    },
    /// A batch request exceeded the engine's item limit.
    #[error("batch of {size} items exceeds the engine limit of {limit}")]
    BatchTooLarge {
        /// Requested batch size.
        size: usize,
        /// Engine limit.
        limit: usize,
    },
    /// A stored or submitted item is missing key attributes or has the wrong
    /// shape.
    #[error("malformed item: {message}")]
    MalformedItem {
        /// What was wrong with the item.
        message: String,
    },
}

impl StorageEngineError {
    /// Helper for backend failures.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Helper for failed conditional writes.
    pub fn condition_failed(message: impl Into<String>) -> Self {
        Self::ConditionFailed {
            message: message.into(),
        }
    }

    /// Helper for malformed items.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedItem {
            message: message.into(),
        }
    }
}

/// Port over the external key-value engine.
///
/// Single-item operations are atomic; there is no cross-item transaction.
/// Batch writes are all-or-nothing per request, not across requests.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Overwrite-put one item, keyed by its `pk`/`sk` attributes.
    async fn put(&self, item: Item) -> Result<(), StorageEngineError>;

    /// Put one item only if `condition` holds against the stored state.
    async fn put_conditional(
        &self,
        item: Item,
        condition: Precondition,
    ) -> Result<(), StorageEngineError>;

    /// Point lookup by primary key.
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StorageEngineError>;

    /// Delete by primary key; deleting an absent item is a no-op.
    async fn delete(&self, key: &ItemKey) -> Result<(), StorageEngineError>;

    /// Run one index query and return a page of items.
    async fn query(&self, request: QueryRequest) -> Result<QueryPage, StorageEngineError>;

    /// Count items matching a query without returning them.
    async fn count(&self, request: QueryRequest) -> Result<u64, StorageEngineError>;

    /// Apply up to [`MAX_BATCH_WRITE_ITEMS`] puts/deletes in one request.
    async fn batch_write(&self, requests: Vec<WriteRequest>) -> Result<(), StorageEngineError>;

    /// Fetch up to [`MAX_BATCH_GET_ITEMS`] items by primary key; absent keys
    /// are skipped.
    async fn batch_get(&self, keys: Vec<ItemKey>) -> Result<Vec<Item>, StorageEngineError>;
}

/// Read a required string attribute from an item.
///
/// # Errors
/// Returns [`StorageEngineError::MalformedItem`] when the attribute is absent
/// or not a string.
pub fn string_attribute(item: &Item, name: &str) -> Result<String, StorageEngineError> {
    item.get(name)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| StorageEngineError::malformed(format!("missing string attribute `{name}`")))
}

/// Extract the primary key of an item from its `pk`/`sk` attributes.
///
/// # Errors
/// Returns [`StorageEngineError::MalformedItem`] when either attribute is
/// absent or not a string.
pub fn item_key_of(item: &Item) -> Result<ItemKey, StorageEngineError> {
    Ok(ItemKey {
        partition: string_attribute(item, PARTITION_KEY_ATTRIBUTE)?,
        sort: string_attribute(item, SORT_KEY_ATTRIBUTE)?,
    })
}

#[cfg(test)]
mod tests {
    //! Condition matching and item-key extraction edge cases.

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(SortCondition::Any, "anything", true)]
    #[case(SortCondition::Equals("S002#E001".into()), "S002#E001", true)]
    #[case(SortCondition::Equals("S002#E001".into()), "S002#E002", false)]
    #[case(SortCondition::BeginsWith("S002#".into()), "S002#E010", true)]
    #[case(SortCondition::BeginsWith("S002#".into()), "S010#E001", false)]
    #[case(
        SortCondition::Between("00000000000100".into(), "00000000000200".into()),
        "00000000000150",
        true
    )]
    #[case(
        SortCondition::Between("00000000000100".into(), "00000000000200".into()),
        "00000000000201",
        false
    )]
    fn sort_condition_matches(
        #[case] condition: SortCondition,
        #[case] value: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(condition.matches(value), expected);
    }

    #[rstest]
    fn item_key_extraction_requires_string_keys() {
        let mut item = Item::new();
        item.insert("pk".to_owned(), json!("USER#u1"));
        item.insert("sk".to_owned(), json!(42));

        let error = item_key_of(&item).expect_err("numeric sk rejected");
        assert!(matches!(error, StorageEngineError::MalformedItem { .. }));
    }

    #[rstest]
    fn item_key_extraction_reads_both_attributes() {
        let mut item = Item::new();
        item.insert("pk".to_owned(), json!("USER#u1"));
        item.insert("sk".to_owned(), json!("PROFILE"));

        let key = item_key_of(&item).expect("well formed item");
        assert_eq!(key, ItemKey::new("USER#u1", "PROFILE"));
    }
}
