//! Ordering specifications.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Deserialize;

use crate::ValidationError;
use crate::metadata::EntityMetadata;
use crate::provider::RawRow;
use crate::value::Value;

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// One (column, direction) tie-break segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSegment {
    pub column: String,
    pub order: Order,
}

/// An ordered sequence of segments; the first segment is the primary key
/// of comparison.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sort {
    pub segments: Vec<SortSegment>,
}

impl Sort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.segments.push(SortSegment {
            column: column.into(),
            order,
        });
        self
    }

    pub fn asc(self, column: impl Into<String>) -> Self {
        self.by(column, Order::Asc)
    }

    pub fn desc(self, column: impl Into<String>) -> Self {
        self.by(column, Order::Desc)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Compare two raw rows segment by segment.
    ///
    /// Values that cannot be read or compared count as equal for that
    /// segment, so the next segment decides.
    pub fn compare(&self, metadata: &EntityMetadata, a: &RawRow, b: &RawRow) -> Ordering {
        for segment in &self.segments {
            let Some(column) = metadata.column(&segment.column) else {
                continue;
            };
            let left = column.read(a).unwrap_or(Value::Null);
            let right = column.read(b).unwrap_or(Value::Null);
            let ordering = left.compare(&right).unwrap_or(Ordering::Equal);
            let ordering = match segment.order {
                Order::Asc => ordering,
                Order::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// A bare column (ascending) or an explicit segment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SortSpec {
    Column(String),
    Segment {
        column: String,
        #[serde(default)]
        descending: bool,
    },
}

impl From<&str> for SortSpec {
    fn from(column: &str) -> Self {
        SortSpec::Column(column.to_string())
    }
}

impl From<String> for SortSpec {
    fn from(column: String) -> Self {
        SortSpec::Column(column)
    }
}

impl From<SortSegment> for SortSpec {
    fn from(segment: SortSegment) -> Self {
        SortSpec::Segment {
            column: segment.column,
            descending: segment.order == Order::Desc,
        }
    }
}

impl From<(&str, Order)> for SortSpec {
    fn from((column, order): (&str, Order)) -> Self {
        SortSpec::Segment {
            column: column.to_string(),
            descending: order == Order::Desc,
        }
    }
}

/// Every accepted way of stating an ordering.
///
/// Deserializes from `"name"`, `["id", "name"]` or
/// `["id", {"column": "name", "descending": true}]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OrderBy {
    #[serde(skip)]
    Sort(Sort),
    Column(String),
    Specs(Vec<SortSpec>),
}

impl From<Sort> for OrderBy {
    fn from(sort: Sort) -> Self {
        OrderBy::Sort(sort)
    }
}

impl From<&str> for OrderBy {
    fn from(column: &str) -> Self {
        OrderBy::Column(column.to_string())
    }
}

impl From<SortSegment> for OrderBy {
    fn from(segment: SortSegment) -> Self {
        OrderBy::Specs(vec![segment.into()])
    }
}

impl<T: Into<SortSpec>> From<Vec<T>> for OrderBy {
    fn from(specs: Vec<T>) -> Self {
        OrderBy::Specs(specs.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<SortSpec>, const N: usize> From<[T; N]> for OrderBy {
    fn from(specs: [T; N]) -> Self {
        OrderBy::Specs(specs.into_iter().map(Into::into).collect())
    }
}

/// Normalize any [`OrderBy`] form into one canonical [`Sort`].
///
/// Input order is preserved as tie-break precedence. Unknown columns and
/// columns appearing more than once are rejected.
pub fn extract_sort_from_settings(
    metadata: &EntityMetadata,
    order_by: impl Into<OrderBy>,
) -> Result<Sort, ValidationError> {
    let segments: Vec<SortSegment> = match order_by.into() {
        OrderBy::Sort(sort) => sort.segments,
        OrderBy::Column(column) => vec![SortSegment {
            column,
            order: Order::Asc,
        }],
        OrderBy::Specs(specs) => specs
            .into_iter()
            .map(|spec| match spec {
                SortSpec::Column(column) => SortSegment {
                    column,
                    order: Order::Asc,
                },
                SortSpec::Segment { column, descending } => SortSegment {
                    column,
                    order: if descending { Order::Desc } else { Order::Asc },
                },
            })
            .collect(),
    };

    let mut seen = HashSet::new();
    for segment in &segments {
        metadata.require_column(&segment.column)?;
        if !seen.insert(segment.column.as_str()) {
            return Err(ValidationError::DuplicateSortColumn {
                column: segment.column.clone(),
            });
        }
    }
    Ok(Sort { segments })
}
