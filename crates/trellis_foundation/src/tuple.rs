//! Fixed-arity tuples, projection masks and partially bound seeds.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::value::Value;

// =============================================================================
// Tuple
// =============================================================================

/// Immutable fixed-length row of values.
///
/// Clones share the underlying slice. Equality and hashing are structural.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tuple(Arc<[Value]>);

impl Tuple {
    /// Creates a tuple from its values.
    #[must_use]
    pub fn new(values: impl Into<Arc<[Value]>>) -> Self {
        Self(values.into())
    }

    /// The empty tuple.
    #[must_use]
    pub fn unit() -> Self {
        Self(Arc::from(Vec::new()))
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty tuple.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Positional access.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// All slots as a slice.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Iterates over the slots.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    /// Projects this tuple through `mask`.
    #[must_use]
    pub fn project(&self, mask: &TupleMask) -> Tuple {
        mask.transform(self)
    }

    /// Concatenates two tuples.
    #[must_use]
    pub fn concat(&self, other: &Tuple) -> Tuple {
        self.0.iter().chain(other.0.iter()).cloned().collect()
    }

    /// Appends the columns of `other` selected by `complementer` to this tuple.
    ///
    /// This is the row shape produced by a join: the primary tuple followed by
    /// the secondary columns not already covered by the join key.
    #[must_use]
    pub fn unify(&self, other: &Tuple, complementer: &TupleMask) -> Tuple {
        self.0
            .iter()
            .cloned()
            .chain(complementer.indices().iter().map(|&i| other.0[i].clone()))
            .collect()
    }
}

impl FromIterator<Value> for Tuple {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Self(values.into())
    }
}

impl<'a> IntoIterator for &'a Tuple {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

// =============================================================================
// TupleMask
// =============================================================================

/// Ordered selection of columns from tuples of a given arity.
///
/// Applying a mask yields the tuple's *signature* under that mask; the same
/// column may be selected more than once.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TupleMask {
    indices: Vec<usize>,
    source_arity: usize,
}

impl TupleMask {
    /// Creates a mask selecting `indices` from tuples of `source_arity`.
    #[must_use]
    pub fn new(indices: Vec<usize>, source_arity: usize) -> Self {
        debug_assert!(indices.iter().all(|&i| i < source_arity));
        Self {
            indices,
            source_arity,
        }
    }

    /// Selects every column in order.
    #[must_use]
    pub fn identity(arity: usize) -> Self {
        Self::new((0..arity).collect(), arity)
    }

    /// Selects no column.
    #[must_use]
    pub fn empty(arity: usize) -> Self {
        Self::new(Vec::new(), arity)
    }

    /// Selects every column except `omitted`.
    #[must_use]
    pub fn omit(omitted: usize, arity: usize) -> Self {
        Self::new((0..arity).filter(|&i| i != omitted).collect(), arity)
    }

    /// Selects the columns flagged `true`, in column order.
    #[must_use]
    pub fn from_flags(flags: &[bool]) -> Self {
        let indices = flags
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        Self::new(indices, flags.len())
    }

    /// This mask with repeated columns dropped, keeping first occurrences.
    #[must_use]
    pub fn select_distinct(&self) -> TupleMask {
        let mut indices = Vec::with_capacity(self.indices.len());
        for &i in &self.indices {
            if !indices.contains(&i) {
                indices.push(i);
            }
        }
        Self::new(indices, self.source_arity)
    }

    /// The selected column indices.
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Arity of the tuples this mask applies to.
    #[must_use]
    pub fn source_arity(&self) -> usize {
        self.source_arity
    }

    /// Arity of the signatures this mask produces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if no column is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Extracts the signature of `tuple`.
    #[must_use]
    pub fn transform(&self, tuple: &Tuple) -> Tuple {
        self.indices.iter().map(|&i| tuple.0[i].clone()).collect()
    }

    /// The mask selecting, in column order, every column this mask does not.
    #[must_use]
    pub fn complementer(&self) -> TupleMask {
        let indices = (0..self.source_arity)
            .filter(|i| !self.indices.contains(i))
            .collect();
        Self::new(indices, self.source_arity)
    }
}

// =============================================================================
// Seed
// =============================================================================

/// Partially bound tuple used to restrict enumeration and listeners.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Seed(Vec<Option<Value>>);

impl Seed {
    /// Creates a seed from explicit slot bindings.
    #[must_use]
    pub fn new(slots: Vec<Option<Value>>) -> Self {
        Self(slots)
    }

    /// A seed of the given arity with no bound slot.
    #[must_use]
    pub fn unbound(arity: usize) -> Self {
        Self(vec![None; arity])
    }

    /// A fully bound seed.
    #[must_use]
    pub fn bound(tuple: &Tuple) -> Self {
        Self(tuple.iter().cloned().map(Some).collect())
    }

    /// Number of slots.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// The binding of a slot, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index).and_then(Option::as_ref)
    }

    /// All slots.
    #[must_use]
    pub fn slots(&self) -> &[Option<Value>] {
        &self.0
    }

    /// Returns true if `index` is bound.
    #[must_use]
    pub fn is_bound(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Number of unbound slots.
    #[must_use]
    pub fn unbound_count(&self) -> usize {
        self.0.iter().filter(|s| s.is_none()).count()
    }

    /// Returns true if every slot is bound.
    #[must_use]
    pub fn is_fully_bound(&self) -> bool {
        self.unbound_count() == 0
    }

    /// Mask of the bound slots.
    #[must_use]
    pub fn bound_mask(&self) -> TupleMask {
        let flags: Vec<bool> = self.0.iter().map(Option::is_some).collect();
        TupleMask::from_flags(&flags)
    }

    /// The bound values, in slot order.
    #[must_use]
    pub fn bound_values(&self) -> Tuple {
        self.0.iter().flatten().cloned().collect()
    }

    /// Returns true if `tuple` agrees with every bound slot.
    #[must_use]
    pub fn matches(&self, tuple: &Tuple) -> bool {
        tuple.len() == self.0.len()
            && self
                .0
                .iter()
                .zip(tuple.iter())
                .all(|(slot, v)| slot.as_ref().is_none_or(|s| s == v))
    }
}
