//! Entity trait for typed records.
//!
//! Types implementing `Entity` describe their own metadata. Add
//! `#[derive(Entity)]` to a serde-enabled struct to generate the
//! implementation.

use serde::{Serialize, de::DeserializeOwned};

use crate::MetadataError;
use crate::metadata::EntityMetadata;

/// A Rust type backed by one entity.
///
/// The derive emits the same builder calls an application would write by
/// hand with [`EntityMetadata::builder`].
///
/// # Example
///
/// ```text
/// #[derive(Entity, Serialize, Deserialize)]
/// #[entity(key = "categories", rename_all = "camelCase")]
/// #[serde(rename_all = "camelCase")]
/// pub struct Category {
///     #[id]
///     pub id: i64,
///     pub category_name: String,
///     pub description: Option<String>,
///     #[column(skip)]
///     pub cached_label: String,
/// }
/// ```
///
/// # Column Naming
///
/// Column keys are the field names unless `rename_all = "camelCase"` is
/// given or a field carries `#[column(name = "...")]`. Keep serde's naming
/// in step so `Row::to_entity` and `Row::assign` see the same keys.
///
/// `Option<T>` fields are nullable. Fields without `#[id]` leave the
/// identity to the first column.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Stable name used for routing and storage naming.
    fn entity_key() -> &'static str;

    /// Build this type's metadata.
    fn metadata() -> Result<EntityMetadata, MetadataError>;
}
