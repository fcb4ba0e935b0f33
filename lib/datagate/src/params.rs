//! Request parameter naming.
//!
//! One flat key space shared by URL query strings, JSON objects and the
//! schema projection's filter inputs:
//!
//! - reserved: `_limit`, `_page`, `_sort`, `_order`
//! - per column: `<col>`, `<col>_ne`, `<col>_gt`, `<col>_gte`, `<col>_lt`,
//!   `<col>_lte`, `<col>_st`, `<col>_contains`, `<col>_null`, `<col>_in`
//! - composite: `OR` (JSON array of parameter objects, any holds) and `AND`
//!   (JSON array of parameter objects, all hold)

use std::collections::HashMap;

use serde_json::{Map, Value as JsonValue};

use crate::ValidationError;
use crate::filter::{Filter, Operator, build_filter};
use crate::metadata::{Column, EntityMetadata};
use crate::sort::{Order, Sort, SortSegment, extract_sort_from_settings};
use crate::value::Value;

pub const LIMIT: &str = "_limit";
pub const PAGE: &str = "_page";
pub const SORT: &str = "_sort";
pub const ORDER: &str = "_order";
pub const OR: &str = "OR";
pub const AND: &str = "AND";

/// Read access to untyped request parameters.
pub trait RequestParams: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

impl RequestParams for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Ordered key/value pairs of a URL query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParams {
    pairs: Vec<(String, String)>,
}

impl UrlParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `a=1&b=2`; a leading `?` is ignored.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        form_urlencoded::parse(query.as_bytes()).into_owned().collect()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn to_query(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.pairs)
            .finish()
    }
}

impl FromIterator<(String, String)> for UrlParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

impl RequestParams for UrlParams {
    /// First value wins when a key repeats.
    fn get(&self, key: &str) -> Option<String> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

/// Parameters read from a JSON object.
///
/// Strings are used as-is, numbers and booleans as their text, arrays and
/// objects as JSON text; `null` reads as absent.
#[derive(Debug, Clone, Copy)]
pub struct JsonParams<'a> {
    object: &'a Map<String, JsonValue>,
}

impl<'a> JsonParams<'a> {
    pub fn new(object: &'a Map<String, JsonValue>) -> Self {
        Self { object }
    }
}

impl RequestParams for JsonParams<'_> {
    fn get(&self, key: &str) -> Option<String> {
        match self.object.get(key)? {
            JsonValue::Null => None,
            JsonValue::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

fn invalid(key: &str, value: impl Into<String>) -> ValidationError {
    ValidationError::InvalidParameter {
        key: key.to_string(),
        value: value.into(),
    }
}

/// Read a non-negative integer parameter such as `_limit` or `_page`.
pub fn parse_number(params: &dyn RequestParams, key: &str) -> Result<Option<u64>, ValidationError> {
    params
        .get(key)
        .map(|raw| raw.trim().parse::<u64>().map_err(|_| invalid(key, raw)))
        .transpose()
}

/// Parse every per-column and composite filter key.
///
/// Returns `None` when no filter key is present. Keys that match no column
/// are ignored.
pub fn parse_filter(
    metadata: &EntityMetadata,
    params: &dyn RequestParams,
) -> Result<Option<Filter>, ValidationError> {
    let mut conjuncts = Vec::new();

    for column in metadata.columns() {
        for operator in Operator::ALL {
            let key = format!("{}{}", column.key(), operator.suffix());
            let Some(raw) = params.get(&key) else {
                continue;
            };
            if !column.supports(operator) {
                return Err(ValidationError::IllegalOperator {
                    column: column.key().to_string(),
                    operator,
                    value_type: column.value_type().clone(),
                });
            }
            conjuncts.push(parse_leaf(column, operator, &key, &raw)?);
        }
    }

    if let Some(raw) = params.get(OR) {
        let alternatives = parse_objects(metadata, OR, &raw)?;
        conjuncts.push(Filter::any(alternatives));
    }
    if let Some(raw) = params.get(AND) {
        conjuncts.extend(parse_objects(metadata, AND, &raw)?);
    }

    Ok(match conjuncts.len() {
        0 => None,
        1 => conjuncts.pop(),
        _ => Some(Filter::all(conjuncts)),
    })
}

fn parse_leaf(
    column: &Column,
    operator: Operator,
    key: &str,
    raw: &str,
) -> Result<Filter, ValidationError> {
    let name = column.key();
    let filter = match operator {
        Operator::Eq => Filter::eq(name, column.parse_input(raw)?),
        Operator::Ne => Filter::ne(name, column.parse_input(raw)?),
        Operator::Gt => Filter::gt(name, column.parse_input(raw)?),
        Operator::Gte => Filter::gte(name, column.parse_input(raw)?),
        Operator::Lt => Filter::lt(name, column.parse_input(raw)?),
        Operator::Lte => Filter::lte(name, column.parse_input(raw)?),
        Operator::StartsWith => Filter::starts_with(name, column.parse_input(raw)?),
        Operator::Contains => Filter::contains(name, column.parse_input(raw)?),
        Operator::IsNull => match raw.trim() {
            "true" | "1" => Filter::is_null(name),
            "false" | "0" => Filter::is_not_null(name),
            _ => return Err(invalid(key, raw)),
        },
        Operator::In => Filter::In(name.to_string(), parse_set(column, key, raw)?),
    };
    Ok(filter)
}

/// `1,2,3` or, when an element contains a comma, `["a,b","c"]`.
fn parse_set(column: &Column, key: &str, raw: &str) -> Result<Vec<Value>, ValidationError> {
    if raw.trim_start().starts_with('[') {
        let items: Vec<JsonValue> = serde_json::from_str(raw).map_err(|_| invalid(key, raw))?;
        return items
            .iter()
            .map(|item| match item {
                JsonValue::String(s) => column.parse_input(s),
                other => column.from_json(other),
            })
            .collect();
    }
    raw.split(',').map(|part| column.parse_input(part)).collect()
}

fn parse_objects(
    metadata: &EntityMetadata,
    key: &str,
    raw: &str,
) -> Result<Vec<Filter>, ValidationError> {
    let objects: Vec<Map<String, JsonValue>> =
        serde_json::from_str(raw).map_err(|_| invalid(key, raw))?;
    objects
        .iter()
        .map(|object| {
            Ok(parse_filter(metadata, &JsonParams::new(object))?
                .unwrap_or_else(|| Filter::all([])))
        })
        .collect()
}

/// Render a filter in the naming [`parse_filter`] reads back.
///
/// Top-level conjuncts become flat keys. A conjunct whose key is already
/// taken (a second bound on one column, a second `OR`) goes into `AND`.
pub fn filter_to_params(
    metadata: &EntityMetadata,
    filter: &Filter,
) -> Result<Vec<(String, String)>, ValidationError> {
    let filter = build_filter(metadata, filter.clone())?;
    let map = to_param_map(metadata, &filter)?;
    Ok(map
        .into_iter()
        .map(|(key, value)| match value {
            JsonValue::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect())
}

fn to_param_map(
    metadata: &EntityMetadata,
    filter: &Filter,
) -> Result<Map<String, JsonValue>, ValidationError> {
    let mut conjuncts = Vec::new();
    flatten_and(filter, &mut conjuncts);

    let mut map = Map::new();
    let mut overflow = Vec::new();
    for conjunct in conjuncts {
        let (key, value) = match conjunct {
            Filter::Or(children) => {
                let objects = children
                    .iter()
                    .map(|child| to_param_map(metadata, child).map(JsonValue::Object))
                    .collect::<Result<Vec<_>, _>>()?;
                (OR.to_string(), JsonValue::Array(objects).to_string())
            }
            leaf => leaf_param(metadata, leaf)?,
        };
        if map.contains_key(&key) {
            let mut single = Map::new();
            single.insert(key, JsonValue::String(value));
            overflow.push(JsonValue::Object(single));
        } else {
            map.insert(key, JsonValue::String(value));
        }
    }
    if !overflow.is_empty() {
        map.insert(AND.to_string(), JsonValue::String(JsonValue::Array(overflow).to_string()));
    }
    Ok(map)
}

fn flatten_and<'a>(filter: &'a Filter, out: &mut Vec<&'a Filter>) {
    match filter {
        Filter::And(children) => {
            for child in children {
                flatten_and(child, out);
            }
        }
        other => out.push(other),
    }
}

fn leaf_param(metadata: &EntityMetadata, leaf: &Filter) -> Result<(String, String), ValidationError> {
    let key = |name: &str, op: Operator| format!("{name}{}", op.suffix());
    Ok(match leaf {
        Filter::Eq(c, Value::Null) | Filter::IsNull(c) => (key(c, Operator::IsNull), "true".to_string()),
        Filter::Ne(c, Value::Null) | Filter::IsNotNull(c) => {
            (key(c, Operator::IsNull), "false".to_string())
        }
        Filter::In(c, values) => (
            key(c, Operator::In),
            format_set(metadata.require_column(c)?, values),
        ),
        Filter::Eq(c, v)
        | Filter::Ne(c, v)
        | Filter::Gt(c, v)
        | Filter::Gte(c, v)
        | Filter::Lt(c, v)
        | Filter::Lte(c, v)
        | Filter::StartsWith(c, v)
        | Filter::Contains(c, v) => {
            let operator = leaf.operator().unwrap_or(Operator::Eq);
            (key(c, operator), metadata.require_column(c)?.format_input(v))
        }
        Filter::And(_) | Filter::Or(_) => {
            return Err(ValidationError::InvalidPayload(format!(
                "cannot render '{leaf}' as a single parameter"
            )));
        }
    })
}

fn format_set(column: &Column, values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(|v| column.format_input(v)).collect();
    let plain = !parts.is_empty()
        && parts.iter().all(|p| !p.contains(','))
        && !parts[0].trim_start().starts_with('[');
    if plain {
        parts.join(",")
    } else {
        JsonValue::from(parts).to_string()
    }
}

/// Read `_sort` (comma-separated column keys) and `_order` (positional
/// `asc`/`desc`, missing entries are ascending).
pub fn parse_sort(
    metadata: &EntityMetadata,
    params: &dyn RequestParams,
) -> Result<Option<Sort>, ValidationError> {
    let Some(raw) = params.get(SORT) else {
        return Ok(None);
    };
    let orders: Vec<String> = params
        .get(ORDER)
        .map(|o| o.split(',').map(|s| s.trim().to_lowercase()).collect())
        .unwrap_or_default();

    let mut segments = Vec::new();
    for (index, column) in raw.split(',').map(str::trim).enumerate() {
        if column.is_empty() {
            continue;
        }
        let order = match orders.get(index).map(String::as_str) {
            None | Some("") | Some("asc") => Order::Asc,
            Some("desc") => Order::Desc,
            Some(other) => return Err(invalid(ORDER, other)),
        };
        segments.push(SortSegment {
            column: column.to_string(),
            order,
        });
    }
    if segments.is_empty() {
        return Ok(None);
    }
    extract_sort_from_settings(metadata, Sort { segments }).map(Some)
}

pub fn sort_to_params(sort: &Sort) -> Vec<(String, String)> {
    if sort.is_empty() {
        return Vec::new();
    }
    let columns: Vec<&str> = sort.segments.iter().map(|s| s.column.as_str()).collect();
    let orders: Vec<&str> = sort
        .segments
        .iter()
        .map(|s| match s.order {
            Order::Asc => "asc",
            Order::Desc => "desc",
        })
        .collect();
    vec![
        (SORT.to_string(), columns.join(",")),
        (ORDER.to_string(), orders.join(",")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn products() -> EntityMetadata {
        EntityMetadata::builder("products")
            .column(Column::integer("id"))
            .column(Column::string("name"))
            .column(Column::float("price"))
            .column(Column::boolean("archived"))
            .column(Column::date("released").allow_null())
            .build()
            .unwrap()
    }

    fn parse(query: &str) -> Result<Option<Filter>, ValidationError> {
        parse_filter(&products(), &UrlParams::from_query(query))
    }

    #[test]
    fn parses_suffixes_into_leaves() {
        let filter = parse("?name_st=a&price_gte=2.5&id_ne=3&archived=false&colour=red")
            .unwrap()
            .unwrap();
        assert_eq!(
            filter,
            Filter::all([
                Filter::ne("id", 3),
                Filter::starts_with("name", "a"),
                Filter::gte("price", 2.5),
                Filter::eq("archived", false),
            ])
        );
        assert_eq!(parse("_limit=3&unrelated=1").unwrap(), None);
    }

    #[test]
    fn parses_null_tests_and_sets() {
        assert_eq!(
            parse("released_null=true").unwrap().unwrap(),
            Filter::is_null("released")
        );
        assert_eq!(
            parse("released_null=false").unwrap().unwrap(),
            Filter::is_not_null("released")
        );
        assert_eq!(
            parse("id_in=1,2,3").unwrap().unwrap(),
            Filter::is_in("id", [1, 2, 3])
        );
        let json_set = UrlParams::new().with("name_in", r#"["a,b","c"]"#);
        assert_eq!(
            parse_filter(&products(), &json_set).unwrap().unwrap(),
            Filter::is_in("name", ["a,b", "c"])
        );
    }

    #[test]
    fn rejects_unsupported_suffixes() {
        let err = parse("archived_gt=true").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::IllegalOperator {
                operator: Operator::Gt,
                ..
            }
        ));
        assert!(matches!(
            parse("price_contains=1").unwrap_err(),
            ValidationError::IllegalOperator { .. }
        ));
        assert!(matches!(
            parse("id=seven").unwrap_err(),
            ValidationError::InvalidValue { .. }
        ));
    }

    #[test]
    fn parses_or_from_json_objects() {
        let object = json!({
            "OR": [{"id": 1}, {"name_contains": "ay", "price_lt": 10}]
        });
        let filter = Filter::from_object(&products(), object.as_object().unwrap()).unwrap();
        assert_eq!(
            filter,
            Filter::eq("id", 1).or(Filter::contains("name", "ay").and(Filter::lt("price", 10.0)))
        );
    }

    #[test]
    fn round_trips_through_url_parameters() {
        let meta = products();
        let filters = [
            Filter::eq("name", "x").and(Filter::gt("id", 2)),
            Filter::gt("id", 1).and(Filter::lt("id", 9)).and(Filter::gt("id", 4)),
            Filter::eq("id", 1)
                .or(Filter::starts_with("name", "a,b").and(Filter::is_null("released")))
                .and(Filter::any([Filter::eq("archived", true), Filter::is_in("name", ["p,q", "r"])])),
            Filter::is_in("id", Vec::<i64>::new()),
            Filter::eq("released", "2024-02-29"),
            Filter::any([]),
        ];
        for filter in filters {
            let query = filter.to_rest_url_params(&meta, &UrlParams::new()).unwrap();
            let parsed = parse_filter(&meta, &UrlParams::from_query(&query))
                .unwrap()
                .unwrap_or_else(|| Filter::all([]));
            let expected = build_filter(&meta, filter).unwrap();
            assert_eq!(parsed, expected, "query: {query}");
        }
    }

    #[test]
    fn reference_operands_keep_the_identity_type() {
        let registry = crate::metadata::EntityRegistry::builder()
            .entity(
                EntityMetadata::builder("categories")
                    .column(Column::string("code"))
                    .build()
                    .unwrap(),
            )
            .entity(
                EntityMetadata::builder("items")
                    .column(Column::integer("id"))
                    .column(Column::reference("category", "categories"))
                    .column(Column::reference("owner", "users"))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let meta = registry.get("items").unwrap();

        for filter in [
            Filter::eq("category", "12"),
            Filter::is_in("category", ["12", "a,b"]),
            Filter::eq("owner", 7).and(Filter::ne("category", "007")),
        ] {
            let query = filter.to_rest_url_params(meta, &UrlParams::new()).unwrap();
            let parsed = parse_filter(meta, &UrlParams::from_query(&query))
                .unwrap()
                .unwrap();
            assert_eq!(parsed, build_filter(meta, filter).unwrap(), "query: {query}");
        }

        let parsed = parse_filter(meta, &UrlParams::from_query("category=12&owner=7"))
            .unwrap()
            .unwrap();
        assert_eq!(parsed, Filter::eq("category", "12").and(Filter::eq("owner", 7)));
        assert!(matches!(
            build_filter(meta, Filter::eq("owner", "7")),
            Err(ValidationError::TypeMismatch { .. })
        ));

        let row = json!({"id": 1, "category": "12", "owner": 7});
        let row = row.as_object().unwrap();
        let direct = build_filter(meta, Filter::eq("category", "12")).unwrap();
        let query = direct.to_rest_url_params(meta, &UrlParams::new()).unwrap();
        let parsed = parse_filter(meta, &UrlParams::from_query(&query))
            .unwrap()
            .unwrap();
        assert!(crate::memory::evaluate(meta, &direct, row));
        assert!(crate::memory::evaluate(meta, &parsed, row));
    }

    #[test]
    fn rest_params_keep_the_base() {
        let meta = products();
        let base = UrlParams::new().with("_limit", "5");
        let query = Filter::eq("name", "a b")
            .to_rest_url_params(&meta, &base)
            .unwrap();
        assert_eq!(query, "_limit=5&name=a+b");
    }

    #[test]
    fn parses_sort_and_order_positionally() {
        let meta = products();
        let params = UrlParams::from_query("_sort=name,id&_order=desc");
        assert_eq!(
            parse_sort(&meta, &params).unwrap(),
            Some(Sort::new().desc("name").asc("id"))
        );
        let sort = Sort::new().asc("price").desc("id");
        let params: UrlParams = sort_to_params(&sort).into_iter().collect();
        assert_eq!(parse_sort(&meta, &params).unwrap(), Some(sort));
        assert!(parse_sort(&meta, &UrlParams::from_query("_sort=id&_order=up")).is_err());
        assert!(parse_sort(&meta, &UrlParams::from_query("_sort=id,id")).is_err());
    }

    #[test]
    fn numbers_must_be_non_negative_integers() {
        let params = UrlParams::from_query("_limit=10&_page=x");
        assert_eq!(parse_number(&params, LIMIT).unwrap(), Some(10));
        assert!(parse_number(&params, PAGE).is_err());
        assert_eq!(parse_number(&params, "_missing").unwrap(), None);
    }
}
