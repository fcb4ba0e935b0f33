//! Backend-agnostic predicate trees.
//!
//! Filters are built untyped (column key + operand) and checked against an
//! entity's metadata with [`build_filter`]. Storage providers translate or
//! evaluate them; the in-memory provider is the reference semantics.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Map;
use serde_json::Value as JsonValue;

use crate::metadata::EntityMetadata;
use crate::params::{self, JsonParams, UrlParams};
use crate::{ValidationError, Value};

/// Comparison and membership operators a leaf can apply.
///
/// The suffix is the parameter-name suffix used by the data API and the
/// schema projection (`name_gt`, `name_in`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    StartsWith,
    Contains,
    IsNull,
    In,
}

impl Operator {
    pub const ALL: [Operator; 10] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::StartsWith,
        Operator::Contains,
        Operator::IsNull,
        Operator::In,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Operator::Eq => "",
            Operator::Ne => "_ne",
            Operator::Gt => "_gt",
            Operator::Gte => "_gte",
            Operator::Lt => "_lt",
            Operator::Lte => "_lte",
            Operator::StartsWith => "_st",
            Operator::Contains => "_contains",
            Operator::IsNull => "_null",
            Operator::In => "_in",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::StartsWith => "starts-with",
            Operator::Contains => "contains",
            Operator::IsNull => "is-null",
            Operator::In => "in",
        };
        write!(f, "{symbol}")
    }
}

/// An immutable predicate tree over an entity's columns.
///
/// Equality is structural: two filters are equal when they select by the
/// same operators, columns and operand sets, regardless of how they were
/// assembled (see [`Filter::canonical`]).
#[derive(Debug, Clone)]
pub enum Filter {
    /// column = value
    Eq(String, Value),
    /// column != value
    Ne(String, Value),
    /// column > value
    Gt(String, Value),
    /// column >= value
    Gte(String, Value),
    /// column < value
    Lt(String, Value),
    /// column <= value
    Lte(String, Value),
    /// column starts with the string operand
    StartsWith(String, Value),
    /// column contains the string operand
    Contains(String, Value),
    /// column IS NULL
    IsNull(String),
    /// column IS NOT NULL
    IsNotNull(String),
    /// column IN (values)
    In(String, Vec<Value>),
    /// every child holds; an empty list matches every row
    And(Vec<Filter>),
    /// any child holds; an empty list matches no row
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(column.into(), value.into())
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(column.into(), value.into())
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(column.into(), value.into())
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(column.into(), value.into())
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(column.into(), value.into())
    }

    pub fn starts_with(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::StartsWith(column.into(), value.into())
    }

    pub fn contains(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains(column.into(), value.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Filter::IsNotNull(column.into())
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    /// Conjunction of all filters.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    /// Disjunction of all filters.
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut children) => {
                children.push(other);
                Filter::And(children)
            }
            this => Filter::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut children) => {
                children.push(other);
                Filter::Or(children)
            }
            this => Filter::Or(vec![this, other]),
        }
    }

    /// Build the implicit equality conjunction of an object literal, e.g.
    /// `{"description": "x", "id_gt": 2}`.
    ///
    /// Keys follow the request-parameter naming, so operator suffixes and
    /// `OR` are honored too. Unknown keys are ignored.
    pub fn from_object(
        metadata: &EntityMetadata,
        object: &Map<String, JsonValue>,
    ) -> Result<Filter, ValidationError> {
        let filter = params::parse_filter(metadata, &JsonParams::new(object))?;
        Ok(filter.unwrap_or_else(|| Filter::all([])))
    }

    /// The column a leaf applies to; `None` for composites.
    pub fn column(&self) -> Option<&str> {
        match self {
            Filter::Eq(c, _)
            | Filter::Ne(c, _)
            | Filter::Gt(c, _)
            | Filter::Gte(c, _)
            | Filter::Lt(c, _)
            | Filter::Lte(c, _)
            | Filter::StartsWith(c, _)
            | Filter::Contains(c, _)
            | Filter::IsNull(c)
            | Filter::IsNotNull(c)
            | Filter::In(c, _) => Some(c),
            Filter::And(_) | Filter::Or(_) => None,
        }
    }

    /// The operator of a leaf; `None` for composites.
    pub fn operator(&self) -> Option<Operator> {
        let op = match self {
            Filter::Eq(..) => Operator::Eq,
            Filter::Ne(..) => Operator::Ne,
            Filter::Gt(..) => Operator::Gt,
            Filter::Gte(..) => Operator::Gte,
            Filter::Lt(..) => Operator::Lt,
            Filter::Lte(..) => Operator::Lte,
            Filter::StartsWith(..) => Operator::StartsWith,
            Filter::Contains(..) => Operator::Contains,
            Filter::IsNull(_) | Filter::IsNotNull(_) => Operator::IsNull,
            Filter::In(..) => Operator::In,
            Filter::And(_) | Filter::Or(_) => return None,
        };
        Some(op)
    }

    /// Normal form used for structural comparison.
    ///
    /// Nested conjunctions/disjunctions are flattened, single-child
    /// composites collapse to the child, children and `IN` operand sets are
    /// ordered and deduplicated, and equality against `null` becomes a null
    /// test.
    pub fn canonical(&self) -> Filter {
        match self {
            Filter::Eq(c, Value::Null) => Filter::IsNull(c.clone()),
            Filter::Ne(c, Value::Null) => Filter::IsNotNull(c.clone()),
            Filter::In(c, values) => {
                let mut values = values.clone();
                values.sort_by(compare_values);
                values.dedup();
                Filter::In(c.clone(), values)
            }
            Filter::And(children) => {
                let mut flat = Vec::new();
                for child in children {
                    match child.canonical() {
                        Filter::And(grand) => flat.extend(grand),
                        other => flat.push(other),
                    }
                }
                collapse(flat, Filter::And)
            }
            Filter::Or(children) => {
                let mut flat = Vec::new();
                for child in children {
                    match child.canonical() {
                        Filter::Or(grand) if !grand.is_empty() => flat.extend(grand),
                        other => flat.push(other),
                    }
                }
                collapse(flat, Filter::Or)
            }
            leaf => leaf.clone(),
        }
    }

    /// Serialize to the request-parameter naming parsed by the data API,
    /// appended to `base`, as a URL query string.
    pub fn to_rest_url_params(
        &self,
        metadata: &EntityMetadata,
        base: &UrlParams,
    ) -> Result<String, ValidationError> {
        let mut out = base.clone();
        for (key, value) in params::filter_to_params(metadata, self)? {
            out.push(key, value);
        }
        Ok(out.to_query())
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    a.compare(b)
        .unwrap_or_else(|| a.kind().cmp(b.kind()))
}

fn collapse(mut children: Vec<Filter>, wrap: fn(Vec<Filter>) -> Filter) -> Filter {
    children.sort_by_cached_key(|f| f.to_string());
    children.dedup_by(|a, b| a.to_string() == b.to_string());
    if children.len() == 1 {
        if let Some(only) = children.pop() {
            return only;
        }
    }
    wrap(children)
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        same_shape(&self.canonical(), &other.canonical())
    }
}

fn same_shape(a: &Filter, b: &Filter) -> bool {
    match (a, b) {
        (Filter::Eq(c1, v1), Filter::Eq(c2, v2))
        | (Filter::Ne(c1, v1), Filter::Ne(c2, v2))
        | (Filter::Gt(c1, v1), Filter::Gt(c2, v2))
        | (Filter::Gte(c1, v1), Filter::Gte(c2, v2))
        | (Filter::Lt(c1, v1), Filter::Lt(c2, v2))
        | (Filter::Lte(c1, v1), Filter::Lte(c2, v2))
        | (Filter::StartsWith(c1, v1), Filter::StartsWith(c2, v2))
        | (Filter::Contains(c1, v1), Filter::Contains(c2, v2)) => c1 == c2 && v1 == v2,
        (Filter::IsNull(c1), Filter::IsNull(c2)) | (Filter::IsNotNull(c1), Filter::IsNotNull(c2)) => {
            c1 == c2
        }
        (Filter::In(c1, v1), Filter::In(c2, v2)) => c1 == c2 && v1 == v2,
        (Filter::And(x), Filter::And(y)) | (Filter::Or(x), Filter::Or(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| same_shape(a, b))
        }
        _ => false,
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq(c, v)
            | Filter::Ne(c, v)
            | Filter::Gt(c, v)
            | Filter::Gte(c, v)
            | Filter::Lt(c, v)
            | Filter::Lte(c, v)
            | Filter::StartsWith(c, v)
            | Filter::Contains(c, v) => {
                let op = self.operator().unwrap_or(Operator::Eq);
                write!(f, "{c} {op} {v}")
            }
            Filter::IsNull(c) => write!(f, "{c} is null"),
            Filter::IsNotNull(c) => write!(f, "{c} is not null"),
            Filter::In(c, values) => {
                let values: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{c} in [{}]", values.join(", "))
            }
            Filter::And(children) if children.is_empty() => write!(f, "true"),
            Filter::Or(children) if children.is_empty() => write!(f, "false"),
            Filter::And(children) | Filter::Or(children) => {
                let joiner = if matches!(self, Filter::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                let parts: Vec<String> = children.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(joiner))
            }
        }
    }
}

/// Check `filter` against an entity: every column must exist, every
/// operator must be legal for its column type, and every operand is coerced
/// to the column's value type.
pub fn build_filter(metadata: &EntityMetadata, filter: Filter) -> Result<Filter, ValidationError> {
    let leaf = |column: &str, operator: Operator| {
        let col = metadata.require_column(column)?;
        if !col.supports(operator) {
            return Err(ValidationError::IllegalOperator {
                column: column.to_string(),
                operator,
                value_type: col.value_type().clone(),
            });
        }
        Ok(col)
    };
    // null only has meaning as an equality operand
    let operand = |column: &str, operator: Operator, value: Value| {
        let value = leaf(column, operator)?.coerce(value)?;
        if value.is_null() {
            return Err(ValidationError::InvalidValue {
                column: column.to_string(),
                reason: format!("null is not a valid '{operator}' operand"),
            });
        }
        Ok(value)
    };

    Ok(match filter {
        Filter::Eq(c, v) => {
            let v = leaf(&c, Operator::Eq)?.coerce(v)?;
            Filter::Eq(c, v)
        }
        Filter::Ne(c, v) => {
            let v = leaf(&c, Operator::Ne)?.coerce(v)?;
            Filter::Ne(c, v)
        }
        Filter::Gt(c, v) => {
            let v = operand(&c, Operator::Gt, v)?;
            Filter::Gt(c, v)
        }
        Filter::Gte(c, v) => {
            let v = operand(&c, Operator::Gte, v)?;
            Filter::Gte(c, v)
        }
        Filter::Lt(c, v) => {
            let v = operand(&c, Operator::Lt, v)?;
            Filter::Lt(c, v)
        }
        Filter::Lte(c, v) => {
            let v = operand(&c, Operator::Lte, v)?;
            Filter::Lte(c, v)
        }
        Filter::StartsWith(c, v) => {
            let v = operand(&c, Operator::StartsWith, v)?;
            Filter::StartsWith(c, v)
        }
        Filter::Contains(c, v) => {
            let v = operand(&c, Operator::Contains, v)?;
            Filter::Contains(c, v)
        }
        Filter::IsNull(c) => {
            leaf(&c, Operator::IsNull)?;
            Filter::IsNull(c)
        }
        Filter::IsNotNull(c) => {
            leaf(&c, Operator::IsNull)?;
            Filter::IsNotNull(c)
        }
        Filter::In(c, values) => {
            leaf(&c, Operator::In)?;
            let values = values
                .into_iter()
                .map(|v| operand(&c, Operator::In, v))
                .collect::<Result<Vec<_>, _>>()?;
            Filter::In(c, values)
        }
        Filter::And(children) => Filter::And(
            children
                .into_iter()
                .map(|child| build_filter(metadata, child))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Filter::Or(children) => Filter::Or(
            children
                .into_iter()
                .map(|child| build_filter(metadata, child))
                .collect::<Result<Vec<_>, _>>()?,
        ),
    })
}
