//! GraphQL-style query schema derived from entity metadata.
//!
//! The schema text and the resolvers both come from the same column
//! metadata and parameter naming as the data API, so a filter input field
//! exists exactly when the list endpoint accepts the matching parameter.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::data_api::{DataApi, DataApiError, DataApiOutcome, DataApiSettings};
use crate::filter::{Filter, Operator};
use crate::metadata::{Column, EntityMetadata, EntityRegistry, ValueType};
use crate::params::{LIMIT, ORDER, PAGE, RequestParams, SORT};
use crate::provider::DataProvider;
use crate::repository::Repository;

const OPTIONS_INPUT: &str = "input options{
    limit:Int
    page:Int
    sort:String
    order:String
}
";

/// The `options` argument of every root query field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QueryOptions {
    pub limit: Option<u64>,
    pub page: Option<u64>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

impl RequestParams for QueryOptions {
    fn get(&self, key: &str) -> Option<String> {
        match key {
            LIMIT => self.limit.map(|n| n.to_string()),
            PAGE => self.page.map(|n| n.to_string()),
            SORT => self.sort.clone(),
            ORDER => self.order.clone(),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolverError {
    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Failed(#[from] DataApiError),

    #[error("list call resolved without rows")]
    Unexpected,
}

/// Resolves one root query field through the list endpoint.
#[derive(Debug, Clone)]
pub struct EntityResolver {
    api: DataApi,
}

impl EntityResolver {
    pub fn new(api: DataApi) -> Self {
        Self { api }
    }

    /// Rows for `<key>(options: ..., filter: ...)`.
    ///
    /// The filter object uses the same keys as the list parameters
    /// (`name_st`, `id_in`, `OR`, ...).
    pub async fn resolve(
        &self,
        options: Option<QueryOptions>,
        filter: Option<&Map<String, JsonValue>>,
    ) -> Result<Vec<JsonValue>, ResolverError> {
        let filter = filter
            .map(|object| Filter::from_object(self.api.metadata(), object))
            .transpose()
            .map_err(DataApiError::from)?;
        let options = options.unwrap_or_default();

        let (sink, slot) = DataApiOutcome::channel();
        self.api.get_array(sink, &options, filter).await;
        match slot.take() {
            Some(DataApiOutcome::Success(JsonValue::Array(rows))) => Ok(rows),
            Some(DataApiOutcome::Error(error)) => Err(error.into()),
            Some(DataApiOutcome::Forbidden) => Err(ResolverError::Forbidden),
            Some(DataApiOutcome::NotFound) => Err(ResolverError::NotFound),
            _ => Err(ResolverError::Unexpected),
        }
    }
}

/// Schema text plus one resolver per root query field, keyed by entity key.
#[derive(Debug, Clone)]
pub struct GraphqlSchema {
    pub schema: String,
    pub resolvers: BTreeMap<String, EntityResolver>,
}

/// Derive the schema for every registered entity.
pub fn build_schema(
    registry: &EntityRegistry,
    provider: &dyn DataProvider,
    settings: &DataApiSettings,
) -> GraphqlSchema {
    let mut types = String::new();
    let mut query = String::new();
    let mut resolvers = BTreeMap::new();

    for metadata in registry.entities() {
        let key = metadata.key();
        write_types(&mut types, metadata);
        let _ = write!(
            query,
            "\n\t{key}(options: options, filter:{key}Filter): [{key}]"
        );
        let repository = Repository::new(metadata.clone(), provider);
        resolvers.insert(
            key.to_string(),
            EntityResolver::new(repository.data_api(settings.clone())),
        );
    }
    tracing::debug!(entities = resolvers.len(), "built query schema");

    GraphqlSchema {
        schema: format!("{OPTIONS_INPUT}{types}type Query {{{query}\n}}\n"),
        resolvers,
    }
}

fn field_type(column: &Column) -> &'static str {
    match column.value_type() {
        ValueType::Boolean => "Boolean",
        ValueType::Integer => "Int",
        ValueType::Float => "Float",
        _ => "String",
    }
}

fn write_types(out: &mut String, metadata: &EntityMetadata) {
    let key = metadata.key();
    let mut fields = String::new();
    let mut filter_fields = String::new();

    for column in metadata.columns() {
        let name = column.key();
        let ty = field_type(column);
        let _ = write!(fields, "\n\t{name}:{ty}");
        for operator in Operator::ALL {
            if !column.supports(operator) {
                continue;
            }
            if operator == Operator::IsNull && !column.is_nullable() {
                continue;
            }
            let suffix = operator.suffix();
            let _ = match operator {
                Operator::IsNull => write!(filter_fields, "\n\t{name}{suffix}:Boolean"),
                Operator::In => write!(filter_fields, "\n\t{name}{suffix}:[{ty}]"),
                _ => write!(filter_fields, "\n\t{name}{suffix}:{ty}"),
            };
        }
    }

    let _ = write!(out, "type {key}{{{fields}\n}}\n");
    let _ = write!(
        out,
        "input {key}Filter{{{filter_fields}\n\tOR:[{key}Filter]\n}}\n"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDataProvider;
    use crate::metadata::Column;

    fn registry() -> EntityRegistry {
        EntityRegistry::builder()
            .entity(
                EntityMetadata::builder("tasks")
                    .column(Column::integer("id"))
                    .column(Column::string("title").allow_null())
                    .column(Column::boolean("done"))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn projects_columns_and_operators() {
        let schema = build_schema(
            &registry(),
            &InMemoryDataProvider::new(),
            &DataApiSettings::default(),
        );
        let expected = "\
input options{
    limit:Int
    page:Int
    sort:String
    order:String
}
type tasks{
\tid:Int
\ttitle:String
\tdone:Boolean
}
input tasksFilter{
\tid:Int
\tid_ne:Int
\tid_gt:Int
\tid_gte:Int
\tid_lt:Int
\tid_lte:Int
\tid_in:[Int]
\ttitle:String
\ttitle_ne:String
\ttitle_gt:String
\ttitle_gte:String
\ttitle_lt:String
\ttitle_lte:String
\ttitle_st:String
\ttitle_contains:String
\ttitle_null:Boolean
\ttitle_in:[String]
\tdone:Boolean
\tdone_ne:Boolean
\tdone_in:[Boolean]
\tOR:[tasksFilter]
}
type Query {
\ttasks(options: options, filter:tasksFilter): [tasks]
}
";
        assert_eq!(schema.schema, expected);
        assert_eq!(schema.resolvers.keys().collect::<Vec<_>>(), vec!["tasks"]);
    }

    #[test]
    fn options_read_as_reserved_parameters() {
        let options = QueryOptions {
            limit: Some(5),
            page: None,
            sort: Some("title".into()),
            order: Some("desc".into()),
        };
        assert_eq!(options.get("_limit").as_deref(), Some("5"));
        assert_eq!(options.get("_page"), None);
        assert_eq!(options.get("_order").as_deref(), Some("desc"));
        assert_eq!(options.get("title"), None);
    }
}
