//! Interface between the query layers and the model they run over.

use std::rc::Rc;

use trellis_base::{IndexingLevel, IndexingService};
use trellis_foundation::{Direction, Result, Seed, Tuple, Value};

use crate::context::{InputKey, MetaContext};

/// Receives the tuple deltas of one input key.
pub trait TupleUpdateListener {
    /// A tuple of the key's relation appeared or disappeared.
    ///
    /// # Errors
    ///
    /// Errors are reported to the indexing error listeners; they do not
    /// roll the update back.
    fn update(&self, direction: Direction, tuple: &Tuple) -> Result<()>;
}

/// Everything the network needs from the model: enumeration, counting and
/// change notification of input key relations, plus batching.
///
/// Seeds restrict enumeration and notification to tuples agreeing with the
/// bound slots. A seed must have the arity of the key.
pub trait QueryRuntimeContext {
    /// The type system the queries were normalized against.
    fn meta_context(&self) -> &dyn MetaContext;

    /// Requests a service for `key`. Levels only grow.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or indexing it fails.
    fn ensure_indexed(&self, key: &InputKey, service: IndexingService) -> Result<()>;

    /// Returns true if `service` is currently available for `key`.
    fn is_indexed(&self, key: &InputKey, service: IndexingService) -> bool;

    /// Returns true if the relation of `key` contains `tuple`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalInputKey` if the key is not indexed for instances.
    fn contains_tuple(&self, key: &InputKey, tuple: &Tuple) -> Result<bool>;

    /// Tuples of the relation agreeing with `seed`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalSeed` for a seed of the wrong arity and
    /// `IllegalInputKey` if the key is not indexed for instances.
    fn enumerate_tuples(&self, key: &InputKey, seed: &Seed) -> Result<Vec<Tuple>>;

    /// Values of the single unbound column of `seed`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalSeed` unless exactly one slot is unbound.
    fn enumerate_values(&self, key: &InputKey, seed: &Seed) -> Result<Vec<Value>>;

    /// Number of tuples agreeing with `seed`.
    ///
    /// # Errors
    ///
    /// Same as [`QueryRuntimeContext::enumerate_tuples`].
    fn count_tuples(&self, key: &InputKey, seed: &Seed) -> Result<usize>;

    /// Subscribes `listener` to changes of tuples agreeing with `seed`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalSeed` for a seed of the wrong arity.
    fn add_update_listener(
        &self,
        key: &InputKey,
        seed: Seed,
        listener: Rc<dyn TupleUpdateListener>,
    ) -> Result<()>;

    /// Cancels a subscription made with the same key, seed and listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription is unknown.
    fn remove_update_listener(
        &self,
        key: &InputKey,
        seed: &Seed,
        listener: &Rc<dyn TupleUpdateListener>,
    ) -> Result<()>;

    /// Runs `f` with traversals of newly indexed keys merged into one.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` or of the merged traversal.
    fn coalesce_traversals(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()>;

    /// Indexes every key at `level` at least.
    ///
    /// # Errors
    ///
    /// Returns an error if re-indexing fails.
    fn ensure_wildcard_indexing(&self, level: IndexingLevel) -> Result<()>;
}
