//! Entity instances with dirty checking.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::metadata::{EntityMetadata, RowId};
use crate::provider::{EntityDataProvider, RawRow};
use crate::{StorageError, ValidationError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowState {
    New,
    Persisted,
    Deleted,
}

/// One entity instance.
///
/// Holds the current values and the last-persisted ("original") values, so
/// `save` can send only what changed.
pub struct Row {
    metadata: Arc<EntityMetadata>,
    provider: Arc<dyn EntityDataProvider>,
    current: RawRow,
    original: RawRow,
    state: RowState,
}

impl Row {
    /// A new, unsaved row holding every column's initial value.
    pub fn new(metadata: Arc<EntityMetadata>, provider: Arc<dyn EntityDataProvider>) -> Self {
        let current = metadata.initial_row();
        Self {
            metadata,
            provider,
            original: current.clone(),
            current,
            state: RowState::New,
        }
    }

    /// A row as loaded from storage.
    pub fn from_storage(
        metadata: Arc<EntityMetadata>,
        provider: Arc<dyn EntityDataProvider>,
        raw: RawRow,
    ) -> Self {
        Self {
            metadata,
            provider,
            original: raw.clone(),
            current: raw,
            state: RowState::Persisted,
        }
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    pub fn is_new(&self) -> bool {
        self.state == RowState::New
    }

    pub fn is_deleted(&self) -> bool {
        self.state == RowState::Deleted
    }

    pub fn get(&self, column: &str) -> Result<Value, ValidationError> {
        self.metadata.require_column(column)?.read(&self.current)
    }

    /// Set a column; the value is coerced to the column type.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<(), ValidationError> {
        let col = self.metadata.require_column(column)?;
        let value = col.coerce(value.into())?;
        col.write(&mut self.current, &value);
        Ok(())
    }

    /// Current values in their wire representation.
    pub fn raw(&self) -> &RawRow {
        &self.current
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.current.clone())
    }

    /// Identity as last persisted.
    pub fn id(&self) -> Result<RowId, ValidationError> {
        self.metadata.id_of(&self.original)
    }

    /// Keys of columns whose current value differs from the original.
    ///
    /// Values are compared as column values, so `3` and `3.0` in a float
    /// column are the same. Slots that do not read as the column type fall
    /// back to comparing the raw wire values.
    pub fn changed_columns(&self) -> Vec<&str> {
        self.metadata
            .columns()
            .iter()
            .filter(|column| match (column.read(&self.current), column.read(&self.original)) {
                (Ok(current), Ok(original)) => {
                    current.compare(&original) != Some(Ordering::Equal)
                }
                _ => self.current.get(column.key()) != self.original.get(column.key()),
            })
            .map(|column| column.key())
            .collect()
    }

    pub fn was_changed(&self) -> bool {
        !self.changed_columns().is_empty()
    }

    /// Restore the last-persisted values.
    pub fn undo_changes(&mut self) {
        self.current = self.original.clone();
    }

    /// Deserialize the current values into a typed entity.
    pub fn to_entity<T: DeserializeOwned>(&self) -> Result<T, StorageError> {
        Ok(serde_json::from_value(self.to_json())?)
    }

    /// Copy the declared columns of a typed entity into this row.
    pub fn assign<T: Serialize>(&mut self, entity: &T) -> Result<(), StorageError> {
        let json = serde_json::to_value(entity)?;
        let JsonValue::Object(object) = json else {
            return Err(ValidationError::InvalidPayload("expected a JSON object".to_string()).into());
        };
        for column in self.metadata.columns() {
            if let Some(json) = object.get(column.key()) {
                let value = column.coerce(column.from_json(json)?)?;
                column.write(&mut self.current, &value);
            }
        }
        Ok(())
    }

    /// Persist the row.
    ///
    /// New rows are inserted whole. Persisted rows send only changed
    /// columns; nothing is written when nothing changed. On success the
    /// stored row becomes the new original. On failure the current values
    /// are left as they are.
    pub async fn save(&mut self) -> Result<(), StorageError> {
        let saved = match self.state {
            RowState::Deleted => {
                return Err(StorageError::InvalidState(format!(
                    "{} row was deleted",
                    self.metadata.key()
                )));
            }
            RowState::New => self.provider.insert(self.current.clone()).await?,
            RowState::Persisted => {
                let changes: RawRow = self
                    .changed_columns()
                    .into_iter()
                    .filter_map(|key| {
                        self.current
                            .get(key)
                            .map(|value| (key.to_string(), value.clone()))
                    })
                    .collect();
                if changes.is_empty() {
                    return Ok(());
                }
                let id = self.id()?;
                tracing::debug!(
                    entity = self.metadata.key(),
                    id = %id,
                    columns = changes.len(),
                    "saving changed columns"
                );
                self.provider.update(&id, changes).await?
            }
        };
        self.current = saved.clone();
        self.original = saved;
        self.state = RowState::Persisted;
        Ok(())
    }

    /// Delete the row from storage; the instance can no longer be saved.
    pub async fn delete(&mut self) -> Result<(), StorageError> {
        if self.state != RowState::Persisted {
            return Err(StorageError::InvalidState(format!(
                "{} row is not persisted",
                self.metadata.key()
            )));
        }
        let id = self.id()?;
        self.provider.delete(&id).await?;
        self.state = RowState::Deleted;
        Ok(())
    }
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Row")
            .field("entity", &self.metadata.key())
            .field("current", &self.current)
            .field("state", &self.state)
            .finish()
    }
}
