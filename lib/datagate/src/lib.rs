//! Datagate - declare entities once, query them through any storage backend.
//!
//! This crate provides typed entity metadata, a backend-agnostic filter and
//! sort DSL, a storage-provider contract with an in-memory reference
//! implementation, a transport-agnostic REST dispatch layer and a
//! GraphQL-style schema projection.
//!
//! # Core Concepts
//!
//! - **Entity**: a named record type with ordered, typed columns.
//! - **Filter**: a predicate tree over an entity's columns. Built in-process
//!   or parsed from request parameters; both forms compare equal.
//! - **Provider**: the only object touching persisted rows of one entity.
//!   The in-memory provider defines the semantics every backend must match.
//!
//! # Layers
//!
//! - [`EntityMetadata`] / [`Entity`]: what an entity looks like
//! - [`Filter`] / [`Sort`]: what to select and in which order
//! - [`DataProvider`] / [`EntityDataProvider`]: where rows live
//! - [`Repository`] / [`Row`]: in-process access with dirty checking
//! - [`DataApi`]: REST-shaped dispatch over [`RequestParams`] and [`DataApiResponse`]
//! - [`build_schema`]: query schema text plus resolvers

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod data_api;
mod entity;
mod error;
mod filter;
mod memory;
mod metadata;
mod params;
mod provider;
mod repository;
mod row;
mod schema;
mod sort;
mod value;

pub use data_api::{
    AccessPolicy, DataApi, DataApiError, DataApiOutcome, DataApiResponse, DataApiSettings,
    Operation, OutcomeSink, OutcomeSlot,
};
pub use entity::Entity;
pub use error::{ConversionError, MetadataError, StorageError, ValidationError};
pub use filter::{Filter, Operator, build_filter};
pub use memory::{InMemoryDataProvider, InMemoryEntityProvider, evaluate};
pub use metadata::{
    Column, EntityMetadata, EntityMetadataBuilder, EntityRegistry, EntityRegistryBuilder, RowId,
    ValueType,
};
pub use params::{
    JsonParams, RequestParams, UrlParams, filter_to_params, parse_filter, parse_number,
    parse_sort, sort_to_params,
};
pub use provider::{DataProvider, EntityDataProvider, FindOptions, RawRow};
pub use repository::Repository;
pub use row::Row;
pub use schema::{EntityResolver, GraphqlSchema, QueryOptions, ResolverError, build_schema};
pub use sort::{Order, OrderBy, Sort, SortSegment, SortSpec, extract_sort_from_settings};
pub use value::{
    BooleanConverter, DateConverter, FloatConverter, IntegerConverter, StringConverter, Value,
    ValueConverter,
};

// Re-export derive macro
pub use datagate_derive::Entity;
