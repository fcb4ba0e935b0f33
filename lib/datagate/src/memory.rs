//! Array-backed reference provider.
//!
//! Used by tests and as the semantics every other backend must reproduce.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

use crate::filter::Filter;
use crate::metadata::{Column, EntityMetadata, RowId, ValueType};
use crate::provider::{DataProvider, EntityDataProvider, FindOptions, RawRow};
use crate::{StorageError, Value};

/// Holds one in-memory store per entity key.
#[derive(Default)]
pub struct InMemoryDataProvider {
    stores: Mutex<HashMap<String, Arc<InMemoryEntityProvider>>>,
}

impl InMemoryDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store of `metadata`'s entity with `rows`.
    pub fn with_rows(self, metadata: &Arc<EntityMetadata>, rows: Vec<RawRow>) -> Self {
        let store = Arc::new(InMemoryEntityProvider::new(metadata.clone(), rows));
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(metadata.key().to_string(), store);
        self
    }
}

impl DataProvider for InMemoryDataProvider {
    fn entity_provider(&self, metadata: &Arc<EntityMetadata>) -> Arc<dyn EntityDataProvider> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let store = stores
            .entry(metadata.key().to_string())
            .or_insert_with(|| Arc::new(InMemoryEntityProvider::new(metadata.clone(), Vec::new())));
        store.clone()
    }
}

/// Rows of one entity in insertion order.
pub struct InMemoryEntityProvider {
    metadata: Arc<EntityMetadata>,
    rows: RwLock<Vec<RawRow>>,
}

impl InMemoryEntityProvider {
    pub fn new(metadata: Arc<EntityMetadata>, rows: Vec<RawRow>) -> Self {
        Self {
            metadata,
            rows: RwLock::new(rows),
        }
    }

    fn position(&self, rows: &[RawRow], id: &RowId) -> Result<Option<usize>, StorageError> {
        let filter = self.metadata.id_filter(id)?;
        Ok(rows.iter().position(|row| evaluate(&self.metadata, &filter, row)))
    }

    /// The identity column generated on insert: a single integer one.
    fn generated_id_column(&self) -> Option<&Column> {
        let mut ids = self.metadata.id_columns();
        let column = ids.next()?;
        if ids.next().is_some() || *column.value_type() != ValueType::Integer {
            return None;
        }
        Some(column)
    }

    /// `max + 1` over the stored ids; `Conflict` once `i64::MAX` is taken.
    fn next_id(&self, column: &Column, rows: &[RawRow]) -> Result<i64, StorageError> {
        let max = rows
            .iter()
            .filter_map(|row| column.read(row).ok().and_then(|v| v.as_i64()))
            .max()
            .unwrap_or(0);
        max.checked_add(1).ok_or_else(|| {
            StorageError::Conflict(format!(
                "{} has no identity left to generate",
                self.metadata.key()
            ))
        })
    }

    /// Lay `row` out in column order, filling missing columns with `null`.
    fn normalize(&self, mut row: RawRow) -> RawRow {
        let mut out = RawRow::new();
        for column in self.metadata.columns() {
            let value = row.remove(column.key()).unwrap_or(JsonValue::Null);
            out.insert(column.key().to_string(), value);
        }
        out
    }
}

#[async_trait]
impl EntityDataProvider for InMemoryEntityProvider {
    async fn find(&self, options: FindOptions) -> Result<Vec<RawRow>, StorageError> {
        let rows = self.rows.read().await;
        let mut result: Vec<RawRow> = match &options.filter {
            Some(filter) => rows
                .iter()
                .filter(|row| evaluate(&self.metadata, filter, row))
                .cloned()
                .collect(),
            None => rows.clone(),
        };
        drop(rows);

        if let Some(sort) = &options.order_by {
            // sort_by is stable: rows equal under every segment keep insertion order
            result.sort_by(|a, b| sort.compare(&self.metadata, a, b));
        }

        let offset = usize::try_from(options.offset()).unwrap_or(usize::MAX);
        let result: Vec<RawRow> = match options.limit {
            Some(limit) => result
                .into_iter()
                .skip(offset)
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect(),
            None => result,
        };

        tracing::debug!(
            entity = self.metadata.key(),
            filter = %options.filter.as_ref().map(ToString::to_string).unwrap_or_default(),
            rows = result.len(),
            "in-memory find"
        );
        Ok(result)
    }

    async fn update(&self, id: &RowId, changes: RawRow) -> Result<RawRow, StorageError> {
        let mut rows = self.rows.write().await;
        let index = self
            .position(&rows, id)?
            .ok_or_else(|| StorageError::NotFound(format!("{} {id}", self.metadata.key())))?;

        let mut updated = rows[index].clone();
        for (key, value) in changes {
            if self.metadata.column(&key).is_some() {
                updated.insert(key, value);
            }
        }

        let new_id = self.metadata.id_of(&updated)?;
        if new_id != *id {
            if let Some(other) = self.position(&rows, &new_id)? {
                if other != index {
                    return Err(StorageError::Conflict(format!(
                        "{} {new_id} already exists",
                        self.metadata.key()
                    )));
                }
            }
        }

        rows[index] = updated.clone();
        tracing::debug!(entity = self.metadata.key(), id = %id, "in-memory update");
        Ok(updated)
    }

    async fn insert(&self, row: RawRow) -> Result<RawRow, StorageError> {
        let mut rows = self.rows.write().await;
        let mut row = self.normalize(row);

        if let Some(column) = self.generated_id_column() {
            if row.get(column.key()).is_none_or(JsonValue::is_null) {
                let next = self.next_id(column, &rows)?;
                row.insert(column.key().to_string(), JsonValue::from(next));
            }
        }

        let id = self.metadata.id_of(&row)?;
        if id.0.iter().any(Value::is_null) {
            return Err(StorageError::Conflict(format!(
                "{} row has no identity",
                self.metadata.key()
            )));
        }
        if self.position(&rows, &id)?.is_some() {
            return Err(StorageError::Conflict(format!(
                "{} {id} already exists",
                self.metadata.key()
            )));
        }

        rows.push(row.clone());
        tracing::debug!(entity = self.metadata.key(), id = %id, "in-memory insert");
        Ok(row)
    }

    async fn delete(&self, id: &RowId) -> Result<(), StorageError> {
        let mut rows = self.rows.write().await;
        let index = self
            .position(&rows, id)?
            .ok_or_else(|| StorageError::NotFound(format!("{} {id}", self.metadata.key())))?;
        rows.remove(index);
        tracing::debug!(entity = self.metadata.key(), id = %id, "in-memory delete");
        Ok(())
    }
}

/// Evaluate a predicate tree against one raw row.
///
/// `null` never satisfies an ordering or string operator. `contains` is
/// case-insensitive, `starts-with` is not. Unknown columns never match.
pub fn evaluate(metadata: &EntityMetadata, filter: &Filter, row: &RawRow) -> bool {
    let read = |column: &str| -> Option<Value> {
        let column = metadata.column(column)?;
        column.read(row).ok()
    };
    let ordered = |column: &str, operand: &Value, accept: fn(std::cmp::Ordering) -> bool| {
        match read(column) {
            Some(value) if !value.is_null() && !operand.is_null() => {
                value.compare(operand).is_some_and(accept)
            }
            _ => false,
        }
    };
    let equal = |value: &Value, operand: &Value| {
        value.compare(operand) == Some(std::cmp::Ordering::Equal)
    };

    match filter {
        Filter::And(children) => children.iter().all(|child| evaluate(metadata, child, row)),
        Filter::Or(children) => children.iter().any(|child| evaluate(metadata, child, row)),
        Filter::Eq(c, operand) => read(c).is_some_and(|v| equal(&v, operand)),
        Filter::Ne(c, operand) => read(c).is_some_and(|v| !equal(&v, operand)),
        Filter::Gt(c, operand) => ordered(c, operand, std::cmp::Ordering::is_gt),
        Filter::Gte(c, operand) => ordered(c, operand, std::cmp::Ordering::is_ge),
        Filter::Lt(c, operand) => ordered(c, operand, std::cmp::Ordering::is_lt),
        Filter::Lte(c, operand) => ordered(c, operand, std::cmp::Ordering::is_le),
        Filter::StartsWith(c, operand) => match (read(c), operand) {
            (Some(Value::String(s)), Value::String(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        Filter::Contains(c, operand) => match (read(c), operand) {
            (Some(Value::String(s)), Value::String(needle)) => {
                s.to_lowercase().contains(&needle.to_lowercase())
            }
            _ => false,
        },
        Filter::IsNull(c) => read(c).is_some_and(|v| v.is_null()),
        Filter::IsNotNull(c) => read(c).is_some_and(|v| !v.is_null()),
        Filter::In(c, operands) => {
            read(c).is_some_and(|v| operands.iter().any(|operand| equal(&v, operand)))
        }
    }
}
