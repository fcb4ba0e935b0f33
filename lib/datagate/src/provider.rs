//! Storage provider contract.
//!
//! - `DataProvider`: a storage backend; yields one `EntityDataProvider` per entity
//! - `EntityDataProvider`: the only object touching persisted rows of one entity
//! - `FindOptions`: filter, ordering and pagination of a `find`

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

use crate::filter::Filter;
use crate::metadata::{EntityMetadata, RowId};
use crate::sort::Sort;
use crate::StorageError;

/// A row in its storage/wire representation, keyed by column key.
pub type RawRow = Map<String, JsonValue>;

/// Options for [`EntityDataProvider::find`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Rows must satisfy this predicate.
    pub filter: Option<Filter>,
    /// Ordering applied before pagination.
    pub order_by: Option<Sort>,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// 1-based page number; only meaningful together with `limit`.
    pub page: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter condition, AND'ed with any existing one.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn order_by(mut self, sort: Sort) -> Self {
        self.order_by = Some(sort);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    /// Rows to skip: `(page - 1) * limit`. Page 0 counts as page 1 and a
    /// page without a limit skips nothing.
    pub fn offset(&self) -> u64 {
        match (self.limit, self.page) {
            (Some(limit), Some(page)) => page.saturating_sub(1).saturating_mul(limit),
            _ => 0,
        }
    }
}

/// Storage backend capability.
///
/// Implementations return the same `EntityDataProvider` instance for the
/// same entity key for as long as the provider lives.
pub trait DataProvider: Send + Sync {
    fn entity_provider(&self, metadata: &Arc<EntityMetadata>) -> Arc<dyn EntityDataProvider>;
}

/// CRUD over the persisted rows of exactly one entity.
///
/// Filtering, ordering and pagination are the provider's job; every
/// backend must return the same rows in the same order as
/// [`crate::InMemoryDataProvider`] for the same options.
#[async_trait]
pub trait EntityDataProvider: Send + Sync {
    /// Rows matching `options`.
    async fn find(&self, options: FindOptions) -> Result<Vec<RawRow>, StorageError>;

    /// Number of rows matching `filter`.
    async fn count(&self, filter: Option<Filter>) -> Result<u64, StorageError> {
        let rows = self
            .find(FindOptions {
                filter,
                ..FindOptions::default()
            })
            .await?;
        Ok(rows.len() as u64)
    }

    /// Apply `changes` (changed columns only) to the row identified by `id`.
    ///
    /// Fails with [`StorageError::NotFound`] if no row matches and
    /// [`StorageError::Conflict`] if the backend rejects the write.
    async fn update(&self, id: &RowId, changes: RawRow) -> Result<RawRow, StorageError>;

    /// Insert a row, returning it with generated fields populated.
    async fn insert(&self, row: RawRow) -> Result<RawRow, StorageError>;

    /// Delete the row identified by `id`; [`StorageError::NotFound`] if absent.
    async fn delete(&self, id: &RowId) -> Result<(), StorageError>;
}
