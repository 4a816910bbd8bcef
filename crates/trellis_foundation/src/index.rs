//! Counted tuple memories and mask-keyed tuple indexes.
//!
//! Every stateful network node keeps its content in these structures. A
//! [`TupleMemory`] is a multiset: the same tuple may be derived more than once
//! and only disappears when its last derivation is revoked. A [`TupleIndex`]
//! groups a memory by the signature a [`TupleMask`] extracts, which is how
//! join nodes find the opposite-side partners of an update.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::delta::Timestamp;
use crate::error::{Error, Result};
use crate::tuple::{Tuple, TupleMask};

/// Derivation count and validity timestamp of a stored tuple.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Multiplicity {
    /// How many times the tuple has been inserted without being revoked.
    pub count: usize,
    /// Revision as of which the tuple is present.
    pub timestamp: Timestamp,
}

// =============================================================================
// TupleMemory
// =============================================================================

/// Multiset of tuples with per-tuple timestamps.
#[derive(Clone, Debug, Default)]
pub struct TupleMemory {
    entries: HashMap<Tuple, Multiplicity>,
}

impl TupleMemory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one derivation of `tuple`.
    ///
    /// Returns true when the tuple was not present before. The timestamp of a
    /// present tuple is the earliest one it was inserted with.
    pub fn insert(&mut self, tuple: Tuple, timestamp: Timestamp) -> bool {
        match self.entries.entry(tuple) {
            Entry::Occupied(mut e) => {
                let m = e.get_mut();
                m.count += 1;
                m.timestamp = m.timestamp.min(timestamp);
                false
            }
            Entry::Vacant(e) => {
                e.insert(Multiplicity {
                    count: 1,
                    timestamp,
                });
                true
            }
        }
    }

    /// Removes one derivation of `tuple`.
    ///
    /// Returns true when the last derivation was removed.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the tuple is not present; a revoke that
    /// was never preceded by its insert means a missed or duplicated delta.
    pub fn remove(&mut self, tuple: &Tuple) -> Result<bool> {
        let Some(m) = self.entries.get_mut(tuple) else {
            return Err(Error::internal(format!(
                "revoked tuple {tuple} is not present"
            )));
        };
        m.count -= 1;
        if m.count == 0 {
            self.entries.remove(tuple);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Returns true if the tuple is present.
    #[must_use]
    pub fn contains(&self, tuple: &Tuple) -> bool {
        self.entries.contains_key(tuple)
    }

    /// Derivation count of the tuple (0 if absent).
    #[must_use]
    pub fn count(&self, tuple: &Tuple) -> usize {
        self.entries.get(tuple).map_or(0, |m| m.count)
    }

    /// Multiplicity of the tuple, if present.
    #[must_use]
    pub fn get(&self, tuple: &Tuple) -> Option<Multiplicity> {
        self.entries.get(tuple).copied()
    }

    /// Number of distinct tuples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no tuple is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over distinct tuples and their multiplicities.
    pub fn iter(&self) -> impl Iterator<Item = (&Tuple, &Multiplicity)> + '_ {
        self.entries.iter()
    }

    /// Iterates over distinct tuples.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.entries.keys()
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// =============================================================================
// TupleIndex
// =============================================================================

/// What an index update changed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexChange {
    /// The tuple itself appeared or disappeared.
    pub present_changed: bool,
    /// The tuple's signature group became non-empty or empty.
    pub signature_changed: bool,
}

/// Multimap from mask signature to the tuples sharing it.
#[derive(Clone, Debug)]
pub struct TupleIndex {
    mask: TupleMask,
    groups: HashMap<Tuple, TupleMemory>,
    size: usize,
}

impl TupleIndex {
    /// Creates an empty index keyed by `mask`.
    #[must_use]
    pub fn new(mask: TupleMask) -> Self {
        Self {
            mask,
            groups: HashMap::new(),
            size: 0,
        }
    }

    /// The signature mask.
    #[must_use]
    pub fn mask(&self) -> &TupleMask {
        &self.mask
    }

    /// Adds one derivation of `tuple`.
    pub fn insert(&mut self, tuple: Tuple, timestamp: Timestamp) -> IndexChange {
        let signature = self.mask.transform(&tuple);
        let group = self.groups.entry(signature).or_default();
        let signature_changed = group.is_empty();
        let present_changed = group.insert(tuple, timestamp);
        if present_changed {
            self.size += 1;
        }
        IndexChange {
            present_changed,
            signature_changed,
        }
    }

    /// Removes one derivation of `tuple`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the tuple is not present.
    pub fn remove(&mut self, tuple: &Tuple) -> Result<IndexChange> {
        let signature = self.mask.transform(tuple);
        let Some(group) = self.groups.get_mut(&signature) else {
            return Err(Error::internal(format!(
                "revoked tuple {tuple} has no signature group {signature}"
            )));
        };
        let present_changed = group.remove(tuple)?;
        let signature_changed = group.is_empty();
        if signature_changed {
            self.groups.remove(&signature);
        }
        if present_changed {
            self.size -= 1;
        }
        Ok(IndexChange {
            present_changed,
            signature_changed,
        })
    }

    /// Tuples sharing `signature`.
    #[must_use]
    pub fn get(&self, signature: &Tuple) -> Option<&TupleMemory> {
        self.groups.get(signature)
    }

    /// Number of distinct tuples sharing `signature`.
    #[must_use]
    pub fn count_signature(&self, signature: &Tuple) -> usize {
        self.groups.get(signature).map_or(0, TupleMemory::len)
    }

    /// Returns true if `tuple` is present.
    #[must_use]
    pub fn contains(&self, tuple: &Tuple) -> bool {
        let signature = self.mask.transform(tuple);
        self.groups.get(&signature).is_some_and(|g| g.contains(tuple))
    }

    /// Iterates over the distinct non-empty signatures.
    pub fn signatures(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.groups.keys()
    }

    /// Iterates over every stored tuple with its multiplicity.
    pub fn iter(&self) -> impl Iterator<Item = (&Tuple, &Multiplicity)> + '_ {
        self.groups.values().flat_map(TupleMemory::iter)
    }

    /// Number of distinct tuples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns true if no tuple is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
