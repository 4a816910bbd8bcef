//! Trellis - Incremental graph-pattern queries over an observable model
//!
//! This crate re-exports all layers of the Trellis system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 5: trellis_runtime    - Query engine, matchers, model runtime context
//! Layer 4: trellis_rete       - RETE network nodes, container and builder
//! Layer 3: trellis_matchers   - Pattern system, normalizer, planner, registry
//! Layer 2: trellis_base       - Incremental base index over the model
//! Layer 1: trellis_model      - Metamodel, objects and change notifications
//! Layer 0: trellis_foundation - Values, tuples, tuple indexes, errors
//! ```

pub use trellis_base as base;
pub use trellis_foundation as foundation;
pub use trellis_matchers as matchers;
pub use trellis_model as model;
pub use trellis_rete as rete;
pub use trellis_runtime as runtime;
