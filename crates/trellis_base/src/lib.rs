//! Base model indexer for Trellis.
//!
//! This crate provides:
//! - [`IndexingLevel`] - How much bookkeeping is kept for a type
//! - [`BaseIndex`] - Incremental index of instances, feature values and
//!   data type occurrences, driven by model notifications
//! - Listener traits for instances, features, data types, batch completion
//!   and indexing errors

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod index;
pub mod level;
pub mod listener;
pub mod options;
mod store;

pub use index::BaseIndex;
pub use level::{IndexingLevel, IndexingService};
pub use listener::{
    BaseIndexChangeListener, DataTypeListener, FeatureListener, IndexingErrorListener,
    InstanceListener,
};
pub use options::BaseIndexOptions;
