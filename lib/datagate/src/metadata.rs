//! Entity and column descriptions.
//!
//! Metadata is registered explicitly through [`EntityMetadata::builder`]
//! (or generated by `#[derive(Entity)]`) and is immutable once built.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::filter::{Filter, Operator};
use crate::provider::RawRow;
use crate::value::{
    BooleanConverter, DateConverter, FloatConverter, IntegerConverter, StringConverter, Value,
    ValueConverter,
};
use crate::{MetadataError, ValidationError};

/// The fixed set of column value types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    /// Holds the identity value of a row of the named entity.
    Reference(String),
}

impl ValueType {
    /// Whether values of this type have a meaningful order.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            ValueType::String | ValueType::Integer | ValueType::Float | ValueType::Date
        )
    }

    fn default_converter(&self) -> Arc<dyn ValueConverter> {
        match self {
            ValueType::String => Arc::new(StringConverter),
            ValueType::Integer | ValueType::Reference(_) => Arc::new(IntegerConverter),
            ValueType::Float => Arc::new(FloatConverter),
            ValueType::Boolean => Arc::new(BooleanConverter),
            ValueType::Date => Arc::new(DateConverter),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::String => write!(f, "string"),
            ValueType::Integer => write!(f, "integer"),
            ValueType::Float => write!(f, "float"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Date => write!(f, "date"),
            ValueType::Reference(entity) => write!(f, "reference to {entity}"),
        }
    }
}

/// One typed field of an entity.
#[derive(Debug, Clone)]
pub struct Column {
    key: String,
    value_type: ValueType,
    allow_null: bool,
    caption: Option<String>,
    read_only: bool,
    default_value: Option<Value>,
    converter: Arc<dyn ValueConverter>,
    custom_converter: bool,
    /// Identity type of the referenced entity; integer until set or
    /// resolved by the registry.
    reference_id: Option<ValueType>,
}

impl Column {
    pub fn new(key: impl Into<String>, value_type: ValueType) -> Self {
        let converter = value_type.default_converter();
        Self {
            key: key.into(),
            value_type,
            allow_null: false,
            caption: None,
            read_only: false,
            default_value: None,
            converter,
            custom_converter: false,
            reference_id: None,
        }
    }

    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::String)
    }

    pub fn integer(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::Integer)
    }

    pub fn float(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::Float)
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::Boolean)
    }

    pub fn date(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::Date)
    }

    pub fn reference(key: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::new(key, ValueType::Reference(entity.into()))
    }

    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn converter(mut self, converter: Arc<dyn ValueConverter>) -> Self {
        self.converter = converter;
        self.custom_converter = true;
        self
    }

    /// Identity type of the entity a reference column points at. Operands
    /// are parsed and coerced as that type. No effect on other columns.
    pub fn id_type(mut self, id_type: ValueType) -> Self {
        self.set_reference_id(id_type);
        self
    }

    fn set_reference_id(&mut self, id_type: ValueType) {
        if !matches!(self.value_type, ValueType::Reference(_))
            || matches!(id_type, ValueType::Reference(_))
        {
            return;
        }
        if !self.custom_converter {
            self.converter = id_type.default_converter();
        }
        self.reference_id = Some(id_type);
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    /// Type operands of this column are checked against: the column type,
    /// or the identity type of the referenced entity.
    pub fn operand_type(&self) -> ValueType {
        match (&self.value_type, &self.reference_id) {
            (ValueType::Reference(_), Some(id_type)) => id_type.clone(),
            (ValueType::Reference(_), None) => ValueType::Integer,
            (value_type, _) => value_type.clone(),
        }
    }

    pub fn is_nullable(&self) -> bool {
        self.allow_null
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The caption, derived from the key when none was given.
    pub fn display_caption(&self) -> String {
        self.caption.clone().unwrap_or_else(|| make_title(&self.key))
    }

    /// Value a new row starts with.
    pub fn initial_value(&self) -> Value {
        if let Some(value) = &self.default_value {
            return value.clone();
        }
        if self.allow_null {
            return Value::Null;
        }
        match self.value_type {
            ValueType::String => Value::String(String::new()),
            ValueType::Integer => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Boolean => Value::Bool(false),
            ValueType::Date | ValueType::Reference(_) => Value::Null,
        }
    }

    /// Whether `operator` may be applied to this column.
    pub fn supports(&self, operator: Operator) -> bool {
        match operator {
            Operator::Eq | Operator::Ne | Operator::In | Operator::IsNull => true,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                self.value_type.is_ordered()
            }
            Operator::StartsWith | Operator::Contains => self.value_type == ValueType::String,
        }
    }

    /// Check a value against the column type, converting where the
    /// conversion is lossless (integers to floats, date strings to dates).
    pub fn coerce(&self, value: Value) -> Result<Value, ValidationError> {
        let expected = self.operand_type();
        let mismatch = |found: &Value| ValidationError::TypeMismatch {
            column: self.key.clone(),
            expected: expected.clone(),
            found: found.kind().to_string(),
        };
        match (&expected, value) {
            (_, Value::Null) => Ok(Value::Null),
            (ValueType::String, v @ Value::String(_)) => Ok(v),
            (ValueType::Integer, v @ Value::Int(_)) => Ok(v),
            (ValueType::Integer, Value::Float(f)) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
            (ValueType::Float, Value::Int(n)) => Ok(Value::Float(n as f64)),
            (ValueType::Float, v @ Value::Float(_)) => Ok(v),
            (ValueType::Boolean, v @ Value::Bool(_)) => Ok(v),
            (ValueType::Date, v @ Value::Date(_)) => Ok(v),
            (ValueType::Date, Value::String(s)) => self.parse_input(&s),
            (_, other) => Err(mismatch(&other)),
        }
    }

    /// Coerce and reject `null` on non-nullable columns.
    pub fn validate(&self, value: Value) -> Result<Value, ValidationError> {
        let value = self.coerce(value)?;
        if value.is_null() && !self.allow_null {
            return Err(ValidationError::NullNotAllowed {
                column: self.key.clone(),
            });
        }
        Ok(value)
    }

    /// Convert a wire value into the in-memory form.
    pub fn from_json(&self, json: &JsonValue) -> Result<Value, ValidationError> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        self.converter
            .from_json(json)
            .map_err(|e| ValidationError::InvalidValue {
                column: self.key.clone(),
                reason: e.0,
            })
    }

    pub fn to_json(&self, value: &Value) -> JsonValue {
        if value.is_null() {
            return JsonValue::Null;
        }
        self.converter.to_json(value)
    }

    /// Read this column from a raw row; a missing slot reads as `null`.
    pub fn read(&self, row: &RawRow) -> Result<Value, ValidationError> {
        match row.get(&self.key) {
            Some(json) => self.from_json(json),
            None => Ok(Value::Null),
        }
    }

    pub fn write(&self, row: &mut RawRow, value: &Value) {
        row.insert(self.key.clone(), self.to_json(value));
    }

    /// Parse a request-parameter string.
    pub fn parse_input(&self, input: &str) -> Result<Value, ValidationError> {
        self.converter
            .from_input(input)
            .map_err(|e| ValidationError::InvalidValue {
                column: self.key.clone(),
                reason: e.0,
            })
    }

    pub fn format_input(&self, value: &Value) -> String {
        if value.is_null() {
            return String::new();
        }
        self.converter.to_input(value)
    }
}

/// `categoryName` / `category_name` -> `Category Name`.
fn make_title(key: &str) -> String {
    let mut title = String::with_capacity(key.len() + 4);
    let mut previous_lower = false;
    for c in key.chars() {
        if c == '_' || c == '-' {
            if !title.ends_with(' ') && !title.is_empty() {
                title.push(' ');
            }
            previous_lower = false;
            continue;
        }
        if c.is_uppercase() && previous_lower {
            title.push(' ');
        }
        if title.is_empty() || title.ends_with(' ') {
            title.extend(c.to_uppercase());
        } else {
            title.push(c);
        }
        previous_lower = c.is_lowercase() || c.is_ascii_digit();
    }
    title
}

/// Identity value(s) of one row, one per identity column.
#[derive(Debug, Clone, PartialEq)]
pub struct RowId(pub Vec<Value>);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Value::to_input).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl From<Value> for RowId {
    fn from(value: Value) -> Self {
        RowId(vec![value])
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        RowId(vec![Value::Int(id)])
    }
}

impl From<i32> for RowId {
    fn from(id: i32) -> Self {
        RowId(vec![Value::Int(i64::from(id))])
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        RowId(vec![Value::from(id)])
    }
}

impl From<String> for RowId {
    fn from(id: String) -> Self {
        RowId(vec![Value::String(id)])
    }
}

/// Describes one record type: its key and ordered columns.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    key: String,
    caption: Option<String>,
    columns: Vec<Column>,
    id_columns: Vec<usize>,
}

impl EntityMetadata {
    pub fn builder(key: impl Into<String>) -> EntityMetadataBuilder {
        EntityMetadataBuilder {
            key: key.into(),
            caption: None,
            columns: Vec::new(),
            id_columns: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn caption(&self) -> String {
        self.caption.clone().unwrap_or_else(|| make_title(&self.key))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.key == key)
    }

    /// Look up a column, failing with [`ValidationError::UnknownColumn`].
    pub fn require_column(&self, key: &str) -> Result<&Column, ValidationError> {
        self.column(key).ok_or_else(|| ValidationError::UnknownColumn {
            entity: self.key.clone(),
            column: key.to_string(),
        })
    }

    pub fn id_columns(&self) -> impl Iterator<Item = &Column> {
        self.id_columns.iter().map(|&idx| &self.columns[idx])
    }

    pub fn is_id_column(&self, key: &str) -> bool {
        self.id_columns().any(|c| c.key == key)
    }

    /// Parse an id from its path form. Composite ids are comma separated.
    pub fn parse_id(&self, id: &str) -> Result<RowId, ValidationError> {
        let columns: Vec<&Column> = self.id_columns().collect();
        let parts: Vec<&str> = if columns.len() == 1 {
            vec![id]
        } else {
            id.split(',').collect()
        };
        if parts.len() != columns.len() {
            return Err(ValidationError::InvalidParameter {
                key: "id".to_string(),
                value: id.to_string(),
            });
        }
        columns
            .iter()
            .zip(parts)
            .map(|(column, part)| column.parse_input(part))
            .collect::<Result<Vec<_>, _>>()
            .map(RowId)
    }

    /// The identity of a raw row.
    pub fn id_of(&self, row: &RawRow) -> Result<RowId, ValidationError> {
        self.id_columns()
            .map(|column| column.read(row))
            .collect::<Result<Vec<_>, _>>()
            .map(RowId)
    }

    /// A filter matching exactly the row with this identity.
    pub fn id_filter(&self, id: &RowId) -> Result<Filter, ValidationError> {
        let columns: Vec<&Column> = self.id_columns().collect();
        if columns.len() != id.0.len() {
            return Err(ValidationError::InvalidParameter {
                key: "id".to_string(),
                value: id.to_string(),
            });
        }
        let leaves = columns
            .into_iter()
            .zip(id.0.iter())
            .map(|(column, value)| {
                column
                    .coerce(value.clone())
                    .map(|v| Filter::eq(column.key(), v))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Filter::all(leaves))
    }

    /// A raw row holding every column's initial value.
    pub fn initial_row(&self) -> RawRow {
        let mut row = RawRow::new();
        for column in &self.columns {
            column.write(&mut row, &column.initial_value());
        }
        row
    }
}

pub struct EntityMetadataBuilder {
    key: String,
    caption: Option<String>,
    columns: Vec<Column>,
    id_columns: Vec<String>,
}

impl EntityMetadataBuilder {
    pub fn caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Mark a column as (part of) the identity. Defaults to the first column.
    pub fn id(mut self, key: impl Into<String>) -> Self {
        self.id_columns.push(key.into());
        self
    }

    pub fn build(self) -> Result<EntityMetadata, MetadataError> {
        if self.key.trim().is_empty() {
            return Err(MetadataError::EmptyKey);
        }
        if self.columns.is_empty() {
            return Err(MetadataError::NoColumns(self.key));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.key.as_str()) {
                return Err(MetadataError::DuplicateColumn {
                    entity: self.key.clone(),
                    column: column.key.clone(),
                });
            }
        }

        let id_columns = if self.id_columns.is_empty() {
            vec![0]
        } else {
            self.id_columns
                .iter()
                .map(|id| {
                    self.columns
                        .iter()
                        .position(|c| &c.key == id)
                        .ok_or_else(|| MetadataError::UnknownIdColumn {
                            entity: self.key.clone(),
                            column: id.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(EntityMetadata {
            key: self.key,
            caption: self.caption,
            columns: self.columns,
            id_columns,
        })
    }
}

/// All entities known to an application, keyed by entity key.
///
/// Populated once at startup through [`EntityRegistry::builder`]; read-only
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<String, Arc<EntityMetadata>>,
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&Arc<EntityMetadata>> {
        self.entities.get(key)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityMetadata>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[derive(Default)]
pub struct EntityRegistryBuilder {
    entities: Vec<EntityMetadata>,
}

impl EntityRegistryBuilder {
    pub fn entity(mut self, metadata: EntityMetadata) -> Self {
        self.entities.push(metadata);
        self
    }

    /// Reference columns without an explicit identity type take the type
    /// of the referenced entity's single identity column.
    pub fn build(mut self) -> Result<EntityRegistry, MetadataError> {
        let id_types: BTreeMap<String, ValueType> = self
            .entities
            .iter()
            .filter_map(|metadata| match metadata.id_columns.as_slice() {
                [only] => metadata
                    .columns
                    .get(*only)
                    .map(|column| (metadata.key.clone(), column.operand_type())),
                _ => None,
            })
            .collect();
        for metadata in &mut self.entities {
            for column in &mut metadata.columns {
                let ValueType::Reference(target) = &column.value_type else {
                    continue;
                };
                if column.reference_id.is_some() {
                    continue;
                }
                if let Some(id_type) = id_types.get(target) {
                    column.set_reference_id(id_type.clone());
                }
            }
        }

        let mut entities = BTreeMap::new();
        for metadata in self.entities {
            let key = metadata.key.clone();
            if entities.insert(key.clone(), Arc::new(metadata)).is_some() {
                return Err(MetadataError::DuplicateEntity(key));
            }
        }
        Ok(EntityRegistry { entities })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn categories() -> EntityMetadata {
        EntityMetadata::builder("categories")
            .column(Column::integer("id"))
            .column(Column::string("categoryName"))
            .column(Column::string("description").allow_null())
            .build()
            .unwrap()
    }

    #[test]
    fn first_column_is_the_default_identity() {
        let meta = categories();
        let ids: Vec<&str> = meta.id_columns().map(Column::key).collect();
        assert_eq!(ids, vec!["id"]);
    }

    #[test]
    fn captions_derive_from_keys() {
        let meta = categories();
        assert_eq!(
            meta.column("categoryName").unwrap().display_caption(),
            "Category Name"
        );
        assert_eq!(make_title("created_at"), "Created At");
        assert_eq!(Column::string("x").caption("Custom").display_caption(), "Custom");
    }

    #[test]
    fn build_rejects_duplicate_columns() {
        let err = EntityMetadata::builder("t")
            .column(Column::integer("id"))
            .column(Column::string("id"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            MetadataError::DuplicateColumn {
                entity: "t".into(),
                column: "id".into()
            }
        );
    }

    #[test]
    fn build_rejects_unknown_identity() {
        let err = EntityMetadata::builder("t")
            .column(Column::integer("id"))
            .id("code")
            .build()
            .unwrap_err();
        assert!(matches!(err, MetadataError::UnknownIdColumn { .. }));
        assert_eq!(
            EntityMetadata::builder(" ").column(Column::integer("id")).build().unwrap_err(),
            MetadataError::EmptyKey
        );
    }

    #[test]
    fn coerce_checks_value_types() {
        let meta = categories();
        let id = meta.column("id").unwrap();
        assert_eq!(id.coerce(Value::Float(3.0)), Ok(Value::Int(3)));
        assert!(matches!(
            id.coerce(Value::from("3")),
            Err(ValidationError::TypeMismatch { .. })
        ));
        let name = meta.column("categoryName").unwrap();
        assert_eq!(
            name.validate(Value::Null),
            Err(ValidationError::NullNotAllowed {
                column: "categoryName".into()
            })
        );
    }

    #[test]
    fn composite_ids_parse_from_comma_separated_paths() {
        let meta = EntityMetadata::builder("lines")
            .column(Column::integer("order"))
            .column(Column::string("sku"))
            .id("order")
            .id("sku")
            .build()
            .unwrap();
        let id = meta.parse_id("7,abc").unwrap();
        assert_eq!(id, RowId(vec![Value::Int(7), Value::from("abc")]));
        assert_eq!(id.to_string(), "7,abc");
        assert!(meta.parse_id("7").is_err());

        let row = json!({"order": 7, "sku": "abc"});
        assert_eq!(meta.id_of(row.as_object().unwrap()).unwrap(), id);
    }

    #[test]
    fn registry_rejects_duplicate_keys() {
        let err = EntityRegistry::builder()
            .entity(categories())
            .entity(categories())
            .build()
            .unwrap_err();
        assert_eq!(err, MetadataError::DuplicateEntity("categories".into()));
    }

    #[test]
    fn initial_row_uses_type_defaults() {
        let row = categories().initial_row();
        assert_eq!(
            JsonValue::Object(row),
            json!({"id": 0, "categoryName": "", "description": null})
        );
    }
}
