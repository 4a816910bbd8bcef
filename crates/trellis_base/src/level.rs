//! How much bookkeeping the indexer performs for a class, feature or data type.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A service a caller needs from the indexer for one key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IndexingService {
    /// Cardinality information.
    Statistics,
    /// Live change notifications.
    Notifications,
    /// Enumeration of the current instances.
    Instances,
}

/// Indexing lattice.
///
/// ```text
///            FULL
///             |
///            BOTH
///           /    \
///   STATISTICS   NOTIFICATIONS
///           \    /
///            NONE
/// ```
///
/// [`IndexingLevel::merge`] is the least upper bound; levels only ever grow
/// through merging.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IndexingLevel {
    /// Nothing is tracked.
    #[default]
    None,
    /// Only cardinalities are tracked.
    Statistics,
    /// Only change notifications are dispatched.
    Notifications,
    /// Cardinalities are tracked and notifications dispatched.
    Both,
    /// The instances themselves are stored.
    Full,
}

impl IndexingLevel {
    /// All levels, bottom first.
    pub const ALL: [IndexingLevel; 5] = [
        Self::None,
        Self::Statistics,
        Self::Notifications,
        Self::Both,
        Self::Full,
    ];

    /// Least level providing the functionality of both inputs.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Full, _) | (_, Self::Full) => Self::Full,
            (Self::Both, _)
            | (_, Self::Both)
            | (Self::Statistics, Self::Notifications)
            | (Self::Notifications, Self::Statistics) => Self::Both,
            (Self::None, x) | (x, Self::None) => x,
            (Self::Statistics, Self::Statistics) => Self::Statistics,
            (Self::Notifications, Self::Notifications) => Self::Notifications,
        }
    }

    /// Level needed for a single service.
    #[must_use]
    pub const fn from_service(service: IndexingService) -> Self {
        match service {
            IndexingService::Statistics => Self::Statistics,
            IndexingService::Notifications => Self::Notifications,
            IndexingService::Instances => Self::Full,
        }
    }

    /// Level needed for a set of services.
    #[must_use]
    pub fn from_services<I: IntoIterator<Item = IndexingService>>(services: I) -> Self {
        services
            .into_iter()
            .fold(Self::None, |acc, s| acc.merge(Self::from_service(s)))
    }

    /// Returns true if `self` provides at least what `other` provides.
    #[must_use]
    pub const fn covers(self, other: Self) -> bool {
        matches!(
            (self.merge(other), self),
            (Self::None, Self::None)
                | (Self::Statistics, Self::Statistics)
                | (Self::Notifications, Self::Notifications)
                | (Self::Both, Self::Both)
                | (Self::Full, Self::Full)
        )
    }

    /// Cardinalities are available.
    #[must_use]
    pub const fn has_statistics(self) -> bool {
        matches!(self, Self::Statistics | Self::Both | Self::Full)
    }

    /// Change notifications are dispatched.
    #[must_use]
    pub const fn has_notifications(self) -> bool {
        matches!(self, Self::Notifications | Self::Both | Self::Full)
    }

    /// Instances can be enumerated.
    #[must_use]
    pub const fn has_instances(self) -> bool {
        matches!(self, Self::Full)
    }

    /// Returns true unless this is [`IndexingLevel::None`].
    #[must_use]
    pub const fn is_some(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for IndexingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Statistics => "STATISTICS",
            Self::Notifications => "NOTIFICATIONS",
            Self::Both => "BOTH",
            Self::Full => "FULL",
        };
        f.write_str(name)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn level() -> impl Strategy<Value = IndexingLevel> {
        prop::sample::select(IndexingLevel::ALL.to_vec())
    }

    fn service() -> impl Strategy<Value = IndexingService> {
        prop_oneof![
            Just(IndexingService::Statistics),
            Just(IndexingService::Notifications),
            Just(IndexingService::Instances),
        ]
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in level(), b in level()) {
            prop_assert_eq!(a.merge(b), b.merge(a));
        }

        #[test]
        fn merge_is_associative(a in level(), b in level(), c in level()) {
            prop_assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
        }

        #[test]
        fn merge_is_idempotent_and_full_absorbs(a in level()) {
            prop_assert_eq!(a.merge(a), a);
            prop_assert_eq!(IndexingLevel::Full.merge(a), IndexingLevel::Full);
            prop_assert_eq!(IndexingLevel::None.merge(a), a);
        }

        #[test]
        fn from_services_is_monotonic(
            base in prop::collection::vec(service(), 0..4),
            extra in prop::collection::vec(service(), 0..4),
        ) {
            let small = IndexingLevel::from_services(base.iter().copied());
            let large = IndexingLevel::from_services(base.iter().chain(extra.iter()).copied());
            prop_assert!(large.covers(small));
        }
    }
}
