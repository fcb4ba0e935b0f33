use thiserror::Error;

use crate::filter::Operator;
use crate::metadata::ValueType;

/// Invalid operands, operators, parameters or payloads.
///
/// Always local to the caller; the data API reports these through its
/// error sink instead of propagating them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown column '{column}' on entity '{entity}'")]
    UnknownColumn { entity: String, column: String },

    #[error("Operator '{operator}' is not supported by column '{column}' ({value_type})")]
    IllegalOperator {
        column: String,
        operator: Operator,
        value_type: ValueType,
    },

    #[error("Column '{column}' expects {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: ValueType,
        found: String,
    },

    #[error("Invalid value for '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("Column '{column}' does not allow null")]
    NullNotAllowed { column: String },

    #[error("Column '{column}' appears more than once in sort")]
    DuplicateSortColumn { column: String },

    #[error("Invalid parameter '{key}': {value}")]
    InvalidParameter { key: String, value: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl ValidationError {
    /// The column this error is attached to, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            ValidationError::UnknownColumn { column, .. }
            | ValidationError::IllegalOperator { column, .. }
            | ValidationError::TypeMismatch { column, .. }
            | ValidationError::InvalidValue { column, .. }
            | ValidationError::NullNotAllowed { column }
            | ValidationError::DuplicateSortColumn { column } => Some(column),
            ValidationError::InvalidParameter { .. } | ValidationError::InvalidPayload(_) => None,
        }
    }
}

/// A value could not be converted between its wire/input form and [`crate::Value`].
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ConversionError(pub String);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    #[error("Entity key must not be empty")]
    EmptyKey,

    #[error("Entity '{0}' has no columns")]
    NoColumns(String),

    #[error("Duplicate column '{column}' on entity '{entity}'")]
    DuplicateColumn { entity: String, column: String },

    #[error("Identity column '{column}' is not declared on entity '{entity}'")]
    UnknownIdColumn { entity: String, column: String },

    #[error("Entity '{0}' is registered more than once")]
    DuplicateEntity(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Write rejected: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
