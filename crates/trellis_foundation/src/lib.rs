//! Values, object identifiers, tuples and tuple indexes for Trellis.
//!
//! This crate provides:
//! - [`Value`] - The slot value type carried by tuples and model features
//! - [`ObjectId`] - Generational model object identifiers
//! - [`Tuple`], [`TupleMask`], [`Seed`] - Rows, projections and partial bindings
//! - [`TupleMemory`], [`TupleIndex`] - Counted tuple stores keyed by mask signatures
//! - [`Error`] - Rich error types with context

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod delta;
pub mod error;
pub mod index;
pub mod object;
pub mod tuple;
pub mod value;

pub use delta::{Delta, Direction, Timestamp};
pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use index::{IndexChange, Multiplicity, TupleIndex, TupleMemory};
pub use object::ObjectId;
pub use tuple::{Seed, Tuple, TupleMask};
pub use value::{Value, ValueKind};
