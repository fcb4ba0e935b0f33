//! Typed access to one entity through a storage provider.

use std::sync::Arc;

use crate::data_api::{DataApi, DataApiSettings};
use crate::entity::Entity;
use crate::filter::{Filter, build_filter};
use crate::metadata::{EntityMetadata, RowId};
use crate::provider::{DataProvider, EntityDataProvider, FindOptions};
use crate::row::Row;
use crate::sort::extract_sort_from_settings;
use crate::{MetadataError, StorageError};

/// Rows of one entity, validated against its metadata before they reach
/// the provider.
#[derive(Clone)]
pub struct Repository {
    metadata: Arc<EntityMetadata>,
    provider: Arc<dyn EntityDataProvider>,
}

impl Repository {
    pub fn new(metadata: Arc<EntityMetadata>, data_provider: &dyn DataProvider) -> Self {
        let provider = data_provider.entity_provider(&metadata);
        Self { metadata, provider }
    }

    /// Repository for a derived entity type.
    pub fn of<T: Entity>(data_provider: &dyn DataProvider) -> Result<Self, MetadataError> {
        Ok(Self::new(Arc::new(T::metadata()?), data_provider))
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    pub fn provider(&self) -> &Arc<dyn EntityDataProvider> {
        &self.provider
    }

    /// A new unsaved row.
    pub fn create(&self) -> Row {
        Row::new(self.metadata.clone(), self.provider.clone())
    }

    /// Rows matching `options`. The filter and sort are checked against the
    /// metadata first.
    pub async fn find(&self, mut options: FindOptions) -> Result<Vec<Row>, StorageError> {
        if let Some(filter) = options.filter.take() {
            options.filter = Some(build_filter(&self.metadata, filter)?);
        }
        if let Some(sort) = options.order_by.take() {
            options.order_by = Some(extract_sort_from_settings(&self.metadata, sort)?);
        }
        tracing::debug!(
            entity = self.metadata.key(),
            filter = %options.filter.as_ref().map(ToString::to_string).unwrap_or_default(),
            "find"
        );
        let rows = self.provider.find(options).await?;
        Ok(rows
            .into_iter()
            .map(|raw| Row::from_storage(self.metadata.clone(), self.provider.clone(), raw))
            .collect())
    }

    pub async fn find_first(&self, options: FindOptions) -> Result<Option<Row>, StorageError> {
        let mut rows = self.find(options.limit(1)).await?;
        Ok(rows.pop())
    }

    pub async fn find_id(&self, id: impl Into<RowId>) -> Result<Option<Row>, StorageError> {
        let filter = self.metadata.id_filter(&id.into())?;
        self.find_first(FindOptions::new().filter(filter)).await
    }

    pub async fn count(&self, filter: Option<Filter>) -> Result<u64, StorageError> {
        let filter = filter
            .map(|f| build_filter(&self.metadata, f))
            .transpose()?;
        self.provider.count(filter).await
    }

    /// Typed rows, deserialized through serde.
    pub async fn find_entities<T: Entity>(
        &self,
        options: FindOptions,
    ) -> Result<Vec<T>, StorageError> {
        self.find(options)
            .await?
            .iter()
            .map(Row::to_entity)
            .collect()
    }

    /// Insert a typed entity and return the stored row.
    pub async fn insert<T: Entity>(&self, entity: &T) -> Result<Row, StorageError> {
        let mut row = self.create();
        row.assign(entity)?;
        row.save().await?;
        Ok(row)
    }

    /// The REST dispatch layer over this repository.
    pub fn data_api(&self, settings: DataApiSettings) -> DataApi {
        DataApi::new(self.clone(), settings)
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &self.metadata.key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDataProvider;
    use crate::metadata::Column;
    use crate::sort::Sort;
    use crate::{ValidationError, Value};
    use serde_json::json;

    fn repository() -> Repository {
        let meta = Arc::new(
            EntityMetadata::builder("categories")
                .column(Column::integer("id"))
                .column(Column::string("categoryName"))
                .column(Column::string("description").allow_null())
                .build()
                .unwrap(),
        );
        let provider = InMemoryDataProvider::new().with_rows(
            &meta,
            vec![
                json!({"id": 1, "categoryName": "noam", "description": "x"}),
                json!({"id": 4, "categoryName": "yael", "description": "x"}),
                json!({"id": 2, "categoryName": "yoni", "description": "y"}),
                json!({"id": 3, "categoryName": "maayan", "description": "y"}),
            ]
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect(),
        );
        Repository::new(meta, &provider)
    }

    #[tokio::test]
    async fn find_validates_before_reaching_the_provider() {
        let repo = repository();
        let err = repo
            .find(FindOptions::new().filter(Filter::eq("id", "one")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::TypeMismatch { .. })
        ));
        let err = repo
            .find(FindOptions::new().order_by(Sort::new().asc("colour")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::UnknownColumn { .. })
        ));
    }

    #[tokio::test]
    async fn find_id_and_count() {
        let repo = repository();
        let row = repo.find_id(4).await.unwrap().unwrap();
        assert_eq!(row.get("categoryName").unwrap(), Value::from("yael"));
        assert!(repo.find_id(9).await.unwrap().is_none());

        assert_eq!(repo.count(None).await.unwrap(), 4);
        assert_eq!(
            repo.count(Some(Filter::eq("description", "y"))).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn created_rows_are_found_after_save() {
        let repo = repository();
        let mut row = repo.create();
        row.set("id", 7).unwrap();
        row.set("categoryName", "new").unwrap();
        row.save().await.unwrap();
        assert!(!row.is_new());

        let first = repo
            .find_first(FindOptions::new().order_by(Sort::new().desc("id")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.get("categoryName").unwrap(), Value::from("new"));
    }
}
