//! Single-table persistence layer for the series tracker.
//!
//! Users follow shows, keep watchlists and custom lists, mark episodes and
//! seasons watched, and follow each other. All of that state lives in one
//! key-value table reached through the [`domain::ports::StorageEngine`] port:
//! every entity owns a composite primary key plus up to four secondary index
//! projections, so each query pattern is a partition/sort lookup rather than
//! a scan.
//!
//! The crate is organised hexagonally: `domain` holds the entities, the key
//! and batch codecs and the store services; `outbound` holds driven adapters
//! of the engine port (currently an in-memory engine for tests and local
//! development). Opaque pagination cursors live in the sibling `pagination`
//! crate.

pub mod config;
pub mod domain;
pub mod outbound;

#[cfg(test)]
pub(crate) mod test_support;
