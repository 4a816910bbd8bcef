//! Metamodel and observable in-memory object graph for Trellis.
//!
//! This crate provides:
//! - [`Metamodel`] - Classes, data types and features with type closures
//! - [`GraphModel`] - Validated object storage with cheap snapshots
//! - [`ModelHandle`] - Shared model access that notifies [`ModelObserver`]s

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod graph;
pub mod handle;
pub mod metamodel;
pub mod store;

pub use graph::{DerivedFn, GraphModel, ModelNotification, Resource, ResourceId};
pub use handle::{ModelHandle, ModelObserver};
pub use metamodel::{
    ClassId, ClassSchema, DataTypeId, DataTypeSchema, FeatureId, FeatureKind, FeatureSchema,
    Metamodel, MetamodelBuilder,
};
pub use store::ObjectStore;
