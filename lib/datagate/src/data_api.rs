//! Transport-agnostic REST dispatch.
//!
//! Every call reads untyped parameters through [`RequestParams`] and
//! resolves exactly one capability of a [`DataApiResponse`]. Errors never
//! propagate past the call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::filter::Filter;
use crate::metadata::EntityMetadata;
use crate::params::{self, LIMIT, PAGE, RequestParams};
use crate::provider::{FindOptions, RawRow};
use crate::repository::Repository;
use crate::row::Row;
use crate::{StorageError, ValidationError};

/// Outcome capabilities of one dispatch call.
///
/// Methods consume the sink, so a call can resolve at most one of them.
pub trait DataApiResponse: Send {
    fn success(self, data: JsonValue);
    fn created(self, data: JsonValue);
    fn deleted(self);
    fn not_found(self);
    fn forbidden(self);
    fn error(self, error: DataApiError);
}

/// Structured failure reported through [`DataApiResponse::error`].
///
/// Serializes as `{"message": ..., "modelState": {column: message}}`; the
/// model state is omitted when no column is at fault.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct DataApiError {
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub model_state: BTreeMap<String, String>,
}

impl DataApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            model_state: BTreeMap::new(),
        }
    }
}

impl From<ValidationError> for DataApiError {
    fn from(error: ValidationError) -> Self {
        let message = error.to_string();
        let mut model_state = BTreeMap::new();
        if let Some(column) = error.column() {
            model_state.insert(column.to_string(), message.clone());
        }
        Self {
            message,
            model_state,
        }
    }
}

impl From<StorageError> for DataApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Validation(e) => e.into(),
            other => DataApiError::new(other.to_string()),
        }
    }
}

/// A resolved dispatch call, as captured by [`OutcomeSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum DataApiOutcome {
    Success(JsonValue),
    Created(JsonValue),
    Deleted,
    NotFound,
    Forbidden,
    Error(DataApiError),
}

impl DataApiOutcome {
    /// An in-process sink and the slot it resolves into.
    pub fn channel() -> (OutcomeSink, OutcomeSlot) {
        let (tx, rx) = oneshot::channel();
        (OutcomeSink(tx), OutcomeSlot(rx))
    }
}

/// Captures the outcome of a call for in-process callers.
#[derive(Debug)]
pub struct OutcomeSink(oneshot::Sender<DataApiOutcome>);

impl OutcomeSink {
    fn resolve(self, outcome: DataApiOutcome) {
        // The slot may already be gone; nobody is waiting then.
        self.0.send(outcome).ok();
    }
}

impl DataApiResponse for OutcomeSink {
    fn success(self, data: JsonValue) {
        self.resolve(DataApiOutcome::Success(data));
    }

    fn created(self, data: JsonValue) {
        self.resolve(DataApiOutcome::Created(data));
    }

    fn deleted(self) {
        self.resolve(DataApiOutcome::Deleted);
    }

    fn not_found(self) {
        self.resolve(DataApiOutcome::NotFound);
    }

    fn forbidden(self) {
        self.resolve(DataApiOutcome::Forbidden);
    }

    fn error(self, error: DataApiError) {
        self.resolve(DataApiOutcome::Error(error));
    }
}

#[derive(Debug)]
pub struct OutcomeSlot(oneshot::Receiver<DataApiOutcome>);

impl OutcomeSlot {
    /// The outcome, once the call has returned.
    pub fn take(mut self) -> Option<DataApiOutcome> {
        self.0.try_recv().ok()
    }
}

/// The operation an access check is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Insert,
    Update,
    Delete,
}

/// Pass-through access hook.
///
/// `row` is the stored row for reads, updates and deletes of one row, the
/// candidate row for inserts, and `None` for list reads.
pub trait AccessPolicy: Send + Sync {
    fn allows(&self, operation: Operation, row: Option<&RawRow>) -> bool;
}

impl<F> AccessPolicy for F
where
    F: Fn(Operation, Option<&RawRow>) -> bool + Send + Sync,
{
    fn allows(&self, operation: Operation, row: Option<&RawRow>) -> bool {
        self(operation, row)
    }
}

/// Per-entity dispatch configuration. The default allows everything and
/// applies no limit.
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataApiSettings {
    pub allow_read: bool,
    pub allow_insert: bool,
    pub allow_update: bool,
    pub allow_delete: bool,
    /// `_limit` used when the request gives none.
    pub default_limit: Option<u64>,
    /// Upper bound for any requested `_limit`.
    pub max_limit: Option<u64>,
    /// AND'ed into every list request.
    #[serde(skip)]
    pub default_filter: Option<Filter>,
    #[serde(skip)]
    pub policy: Option<Arc<dyn AccessPolicy>>,
}

impl Default for DataApiSettings {
    fn default() -> Self {
        Self {
            allow_read: true,
            allow_insert: true,
            allow_update: true,
            allow_delete: true,
            default_limit: None,
            max_limit: None,
            default_filter: None,
            policy: None,
        }
    }
}

impl DataApiSettings {
    pub fn read_only(mut self) -> Self {
        self.allow_insert = false;
        self.allow_update = false;
        self.allow_delete = false;
        self
    }

    pub fn with_policy(mut self, policy: impl AccessPolicy + 'static) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    pub fn with_default_filter(mut self, filter: Filter) -> Self {
        self.default_filter = Some(filter);
        self
    }

    pub fn with_limits(mut self, default_limit: Option<u64>, max_limit: Option<u64>) -> Self {
        self.default_limit = default_limit;
        self.max_limit = max_limit;
        self
    }

    pub fn allows(&self, operation: Operation, row: Option<&RawRow>) -> bool {
        let flag = match operation {
            Operation::Read => self.allow_read,
            Operation::Insert => self.allow_insert,
            Operation::Update => self.allow_update,
            Operation::Delete => self.allow_delete,
        };
        flag && self
            .policy
            .as_ref()
            .is_none_or(|policy| policy.allows(operation, row))
    }

    fn effective_limit(&self, requested: Option<u64>) -> Option<u64> {
        match (requested.or(self.default_limit), self.max_limit) {
            (Some(limit), Some(max)) => Some(limit.min(max)),
            (None, Some(max)) => Some(max),
            (limit, None) => limit,
        }
    }
}

impl fmt::Debug for DataApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataApiSettings")
            .field("allow_read", &self.allow_read)
            .field("allow_insert", &self.allow_insert)
            .field("allow_update", &self.allow_update)
            .field("allow_delete", &self.allow_delete)
            .field("default_limit", &self.default_limit)
            .field("max_limit", &self.max_limit)
            .field("default_filter", &self.default_filter)
            .field("policy", &self.policy.is_some())
            .finish()
    }
}

/// List, get, post, put and delete for one entity.
#[derive(Debug, Clone)]
pub struct DataApi {
    repository: Repository,
    settings: DataApiSettings,
}

impl DataApi {
    pub fn new(repository: Repository, settings: DataApiSettings) -> Self {
        Self {
            repository,
            settings,
        }
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        self.repository.metadata()
    }

    /// `GET /{key}`: rows matching the caller filter, the default filter and
    /// the parsed parameters, ordered and paged as requested.
    pub async fn get_array(
        &self,
        response: impl DataApiResponse,
        params: &dyn RequestParams,
        filter: Option<Filter>,
    ) {
        tracing::debug!(entity = self.metadata().key(), "get_array");
        if !self.settings.allows(Operation::Read, None) {
            return response.forbidden();
        }
        match self.list(params, filter).await {
            Ok(rows) => response.success(JsonValue::Array(rows)),
            Err(error) => self.fail(response, error),
        }
    }

    async fn list(
        &self,
        params: &dyn RequestParams,
        filter: Option<Filter>,
    ) -> Result<Vec<JsonValue>, StorageError> {
        let metadata = self.metadata();
        let mut options = FindOptions::new();
        for filter in [
            filter,
            self.settings.default_filter.clone(),
            params::parse_filter(metadata, params)?,
        ]
        .into_iter()
        .flatten()
        {
            options = options.filter(filter);
        }
        if let Some(sort) = params::parse_sort(metadata, params)? {
            options = options.order_by(sort);
        }
        options.limit = self
            .settings
            .effective_limit(params::parse_number(params, LIMIT)?);
        options.page = params::parse_number(params, PAGE)?;

        let rows = self.repository.find(options).await?;
        tracing::debug!(entity = metadata.key(), rows = rows.len(), "listed");
        Ok(rows.iter().map(Row::to_json).collect())
    }

    /// `GET /{key}/{id}`.
    pub async fn get(&self, response: impl DataApiResponse, id: &str) {
        tracing::debug!(entity = self.metadata().key(), id, "get");
        if !self.settings.allow_read {
            return response.forbidden();
        }
        match self.find_row(id).await {
            Ok(Some(row)) if !self.settings.allows(Operation::Read, Some(row.raw())) => {
                response.forbidden()
            }
            Ok(Some(row)) => response.success(row.to_json()),
            Ok(None) => response.not_found(),
            Err(error) => self.fail(response, error),
        }
    }

    /// `POST /{key}`: insert a row built from the column defaults and the
    /// body.
    pub async fn post(&self, response: impl DataApiResponse, body: &JsonValue) {
        tracing::debug!(entity = self.metadata().key(), "post");
        if !self.settings.allow_insert {
            return response.forbidden();
        }
        let mut row = self.repository.create();
        if let Err(error) = self.apply(&mut row, body) {
            return response.error(error);
        }
        if !self.settings.allows(Operation::Insert, Some(row.raw())) {
            return response.forbidden();
        }
        match row.save().await {
            Ok(()) => response.created(row.to_json()),
            Err(error) => self.fail(response, error),
        }
    }

    /// `PUT /{key}/{id}`: apply the body and save the changed columns.
    pub async fn put(&self, response: impl DataApiResponse, id: &str, body: &JsonValue) {
        tracing::debug!(entity = self.metadata().key(), id, "put");
        if !self.settings.allow_update {
            return response.forbidden();
        }
        let mut row = match self.find_row(id).await {
            Ok(Some(row)) => row,
            Ok(None) => return response.not_found(),
            Err(error) => return self.fail(response, error),
        };
        if !self.settings.allows(Operation::Update, Some(row.raw())) {
            return response.forbidden();
        }
        if let Err(error) = self.apply(&mut row, body) {
            return response.error(error);
        }
        match row.save().await {
            Ok(()) => response.success(row.to_json()),
            Err(error) => self.fail(response, error),
        }
    }

    /// `DELETE /{key}/{id}`.
    pub async fn delete(&self, response: impl DataApiResponse, id: &str) {
        tracing::debug!(entity = self.metadata().key(), id, "delete");
        if !self.settings.allow_delete {
            return response.forbidden();
        }
        let mut row = match self.find_row(id).await {
            Ok(Some(row)) => row,
            Ok(None) => return response.not_found(),
            Err(error) => return self.fail(response, error),
        };
        if !self.settings.allows(Operation::Delete, Some(row.raw())) {
            return response.forbidden();
        }
        match row.delete().await {
            Ok(()) => response.deleted(),
            Err(error) => self.fail(response, error),
        }
    }

    /// An id that does not parse for the identity columns matches no row.
    async fn find_row(&self, id: &str) -> Result<Option<Row>, StorageError> {
        let Ok(id) = self.metadata().parse_id(id) else {
            return Ok(None);
        };
        self.repository.find_id(id).await
    }

    /// Copy the known, writable columns of a JSON object body into `row`,
    /// then check nullability of the whole row. Errors are collected per
    /// column.
    fn apply(&self, row: &mut Row, body: &JsonValue) -> Result<(), DataApiError> {
        let JsonValue::Object(object) = body else {
            return Err(ValidationError::InvalidPayload("expected a JSON object".to_string()).into());
        };
        let mut model_state = BTreeMap::new();
        for column in self.metadata().columns() {
            let Some(json) = object.get(column.key()) else {
                continue;
            };
            if column.is_read_only() {
                continue;
            }
            let applied = column
                .from_json(json)
                .and_then(|value| column.validate(value))
                .and_then(|value| row.set(column.key(), value));
            if let Err(error) = applied {
                model_state.insert(column.key().to_string(), error.to_string());
            }
        }
        for column in self.metadata().columns() {
            if model_state.contains_key(column.key()) || column.is_nullable() {
                continue;
            }
            if row.get(column.key()).is_ok_and(|v| v.is_null()) {
                let error = ValidationError::NullNotAllowed {
                    column: column.key().to_string(),
                };
                model_state.insert(column.key().to_string(), error.to_string());
            }
        }

        match model_state.values().next() {
            None => Ok(()),
            Some(first) => Err(DataApiError {
                message: first.clone(),
                model_state,
            }),
        }
    }

    fn fail(&self, response: impl DataApiResponse, error: StorageError) {
        match error {
            StorageError::NotFound(_) => response.not_found(),
            StorageError::Validation(error) => {
                tracing::debug!(entity = self.metadata().key(), %error, "rejected request");
                response.error(error.into())
            }
            other => {
                tracing::warn!(entity = self.metadata().key(), error = %other, "provider failure");
                response.error(other.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validation_errors_carry_model_state() {
        let error: DataApiError = ValidationError::NullNotAllowed {
            column: "name".into(),
        }
        .into();
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({
                "message": "Column 'name' does not allow null",
                "modelState": {"name": "Column 'name' does not allow null"}
            })
        );
        let error: DataApiError = StorageError::Conflict("duplicate id".into()).into();
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"message": "Write rejected: duplicate id"})
        );
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: DataApiSettings =
            serde_json::from_value(json!({"allowDelete": false, "maxLimit": 50})).unwrap();
        assert!(settings.allow_read && settings.allow_insert);
        assert!(!settings.allows(Operation::Delete, None));
        assert_eq!(settings.effective_limit(None), Some(50));
        assert_eq!(settings.effective_limit(Some(500)), Some(50));
        assert_eq!(DataApiSettings::default().effective_limit(Some(3)), Some(3));
    }

    #[test]
    fn policy_is_consulted_after_flags() {
        let settings = DataApiSettings::default()
            .with_policy(|operation: Operation, _: Option<&RawRow>| operation == Operation::Read);
        assert!(settings.allows(Operation::Read, None));
        assert!(!settings.allows(Operation::Insert, None));
        assert!(!DataApiSettings::default().read_only().allows(Operation::Update, None));
    }

    #[test]
    fn slot_holds_the_single_outcome() {
        let (sink, slot) = DataApiOutcome::channel();
        sink.not_found();
        assert_eq!(slot.take(), Some(DataApiOutcome::NotFound));

        let (sink, slot) = DataApiOutcome::channel();
        drop(sink);
        assert_eq!(slot.take(), None);
    }
}
