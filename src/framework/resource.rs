//! # Resource & Aggregate Traits
//!
//! The engine never knows concrete domain types. A domain plugs in through two traits:
//!
//! - [`Resource`]: the *tagged variant* over every aggregate the domain persists
//!   (one enum, one variant per aggregate type). This is what buckets, snapshots,
//!   change sets and the storage collaborator move around.
//! - [`Aggregate`]: implemented by each concrete aggregate struct so business code can
//!   read and mutate the container with its own types (`get_by_id::<Customer>(..)`).
//!
//! # Architecture Note
//! The aggregate type is identified by [`Resource::Kind`], a plain `Copy` enum. Every
//! registry in the engine is keyed by that tag, so lookups are ordinary hash-map
//! lookups and never need reflection.

use serde::Serialize;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Stable identifier of an aggregate (the `entity_id` attribute).
pub type EntityId = String;

/// Name of the identity attribute every aggregate serializes.
pub const ENTITY_ID: &str = "entity_id";

/// A type tag naming one aggregate type.
pub trait ResourceKind: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> ResourceKind for T where T: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Tagged variant over all aggregates of a domain.
///
/// The serialized form of a resource must be the serialized form of the aggregate it
/// wraps (e.g. `#[serde(untagged)]`). Snapshot content and attribute filters are both
/// computed from it.
pub trait Resource: Clone + Debug + Serialize + Send + Sync + 'static {
    /// The aggregate type tag.
    type Kind: ResourceKind;

    /// Which aggregate type this value holds.
    fn kind(&self) -> Self::Kind;

    /// The stable identity of the wrapped aggregate.
    fn entity_id(&self) -> &EntityId;
}

/// A concrete aggregate type that lives inside the resource enum `R`.
pub trait Aggregate<R: Resource>: Clone + Debug + Serialize + Send + Sync + Sized + 'static {
    /// The tag of this aggregate type.
    const KIND: R::Kind;

    fn entity_id(&self) -> &EntityId;

    /// Wraps the aggregate into its resource variant.
    fn into_resource(self) -> R;

    /// Borrows the aggregate out of a resource, `None` if the variant differs.
    fn from_resource(resource: &R) -> Option<&Self>;

    fn from_resource_mut(resource: &mut R) -> Option<&mut Self>;
}

/// Serializes a resource into the value form used for snapshots and attribute filters.
pub(crate) fn to_value<T: Serialize>(item: &T) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(item)
}

/// Projects one attribute out of a serialized aggregate.
///
/// Missing attributes project to `Null`, which never equals a filter value.
pub(crate) fn attribute<'a>(value: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
    value.get(name).unwrap_or(&serde_json::Value::Null)
}
