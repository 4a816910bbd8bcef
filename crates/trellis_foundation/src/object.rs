//! Model object identifiers with generational indices.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Object identifier with generational index for stale reference detection.
///
/// The generation counter increments when an object slot is reused after
/// deletion, so a tuple that still mentions a deleted object never aliases
/// the object that later reuses its slot.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ObjectId {
    /// Index into object storage.
    pub index: u64,
    /// Generation counter for stale reference detection.
    pub generation: u32,
}

impl ObjectId {
    /// Creates a new object ID with the given index and generation.
    #[must_use]
    pub const fn new(index: u64, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns a sentinel value representing "no object".
    #[must_use]
    pub const fn null() -> Self {
        Self {
            index: u64::MAX,
            generation: 0,
        }
    }

    /// Returns true if this is the null sentinel value.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.index == u64::MAX
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "ObjectId(null)")
        } else {
            write!(f, "ObjectId({}v{})", self.index, self.generation)
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "@null")
        } else {
            write!(f, "@{}", self.index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_equality() {
        let a = ObjectId::new(1, 1);
        let b = ObjectId::new(1, 1);
        let c = ObjectId::new(1, 3);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn object_id_null() {
        assert!(ObjectId::null().is_null());
        assert!(!ObjectId::new(0, 1).is_null());
    }

    #[test]
    fn object_id_formatting() {
        let o = ObjectId::new(42, 3);
        assert_eq!(format!("{o:?}"), "ObjectId(42v3)");
        assert_eq!(format!("{o}"), "@42");
        assert_eq!(format!("{:?}", ObjectId::null()), "ObjectId(null)");
    }

    #[test]
    fn object_id_ordering_is_index_first() {
        assert!(ObjectId::new(1, 9) < ObjectId::new(2, 1));
        assert!(ObjectId::new(2, 1) < ObjectId::new(2, 3));
    }
}
