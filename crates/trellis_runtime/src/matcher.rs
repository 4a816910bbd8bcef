//! Per-query access to the match set.

use std::collections::HashMap;
use std::rc::Rc;

use trellis_foundation::{Error, Result, Seed};
use trellis_matchers::PQuery;
use trellis_rete::NodeId;

use crate::engine::QueryEngine;
use crate::pattern_match::Match;

/// Receives match set changes of one query.
///
/// Calls happen after the model change that caused them has been fully
/// propagated, so implementations may read from the engine.
pub trait MatchUpdateListener {
    /// A match entered the result.
    fn appeared(&self, m: &Match);

    /// A match left the result.
    fn disappeared(&self, m: &Match);
}

/// Handle returned by [`PatternMatcher::add_match_listener`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Read access to the matches of one query, kept up to date by the engine.
#[derive(Clone)]
pub struct PatternMatcher {
    engine: Rc<QueryEngine>,
    query: Rc<PQuery>,
    production: NodeId,
}

impl PatternMatcher {
    pub(crate) fn new(engine: Rc<QueryEngine>, query: Rc<PQuery>, production: NodeId) -> Self {
        Self {
            engine,
            query,
            production,
        }
    }

    /// The query.
    #[must_use]
    pub fn query(&self) -> &Rc<PQuery> {
        &self.query
    }

    /// The engine this matcher belongs to.
    #[must_use]
    pub fn engine(&self) -> &Rc<QueryEngine> {
        &self.engine
    }

    /// Fully qualified name of the query.
    #[must_use]
    pub fn pattern_name(&self) -> &str {
        self.query.fqn()
    }

    /// Parameter positions by name.
    #[must_use]
    pub fn pos_mapping(&self) -> HashMap<String, usize> {
        self.query.pos_mapping()
    }

    /// Every current match, in a deterministic order.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` after the engine was disposed, or the error of a
    /// pending propagation.
    pub fn all_matches(&self) -> Result<Vec<Match>> {
        let mut matches: Vec<Match> = self
            .engine
            .pull(self.production)?
            .into_iter()
            .map(|t| Match::new(Rc::clone(&self.query), t))
            .collect();
        matches.sort_by(Match::total_cmp);
        Ok(matches)
    }

    /// Current matches agreeing with the bound positions of `seed`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalSeed` if the seed arity differs from the query arity,
    /// and the errors of [`PatternMatcher::all_matches`].
    pub fn all_matches_seeded(&self, seed: &Seed) -> Result<Vec<Match>> {
        self.check_seed(seed)?;
        Ok(self
            .all_matches()?
            .into_iter()
            .filter(|m| seed.matches(&m.to_tuple()))
            .collect())
    }

    /// Current matches compatible with a partial match.
    ///
    /// # Errors
    ///
    /// Same as [`PatternMatcher::all_matches`].
    pub fn all_matches_like(&self, partial: &Match) -> Result<Vec<Match>> {
        Ok(self
            .all_matches()?
            .into_iter()
            .filter(|m| partial.is_compatible_with(m))
            .collect())
    }

    /// Number of current matches.
    ///
    /// # Errors
    ///
    /// Same as [`PatternMatcher::all_matches`].
    pub fn count_matches(&self) -> Result<usize> {
        Ok(self.engine.pull(self.production)?.len())
    }

    /// Number of current matches agreeing with `seed`.
    ///
    /// # Errors
    ///
    /// Same as [`PatternMatcher::all_matches_seeded`].
    pub fn count_matches_seeded(&self, seed: &Seed) -> Result<usize> {
        Ok(self.all_matches_seeded(seed)?.len())
    }

    /// Returns true if the result is not empty.
    ///
    /// # Errors
    ///
    /// Same as [`PatternMatcher::all_matches`].
    pub fn has_match(&self) -> Result<bool> {
        Ok(self.count_matches()? > 0)
    }

    /// Returns true if the fully bound `seed` is a match.
    ///
    /// # Errors
    ///
    /// Same as [`PatternMatcher::all_matches_seeded`].
    pub fn has_match_seeded(&self, seed: &Seed) -> Result<bool> {
        Ok(!self.all_matches_seeded(seed)?.is_empty())
    }

    /// Some current match, if any.
    ///
    /// # Errors
    ///
    /// Same as [`PatternMatcher::all_matches`].
    pub fn one_arbitrary_match(&self) -> Result<Option<Match>> {
        Ok(self
            .engine
            .pull(self.production)?
            .into_iter()
            .next()
            .map(|t| Match::new(Rc::clone(&self.query), t)))
    }

    /// Subscribes `listener` to changes of the match set. With `fire_now`,
    /// the current matches are reported as appeared first.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` after the engine was disposed.
    pub fn add_match_listener(&self, listener: Rc<dyn MatchUpdateListener>, fire_now: bool) -> Result<ListenerId> {
        self.engine.dispatch_pending();
        if fire_now {
            for m in self.all_matches()? {
                listener.appeared(&m);
            }
        }
        self.engine.register(self.production, &self.query, listener)
    }

    /// Unsubscribes a listener. Returns false for an unknown id.
    pub fn remove_match_listener(&self, id: ListenerId) -> bool {
        self.engine.unregister(id)
    }

    fn check_seed(&self, seed: &Seed) -> Result<()> {
        if seed.arity() != self.query.arity() {
            return Err(Error::illegal_seed(
                self.query.fqn(),
                format!("seed of arity {} for a query of arity {}", seed.arity(), self.query.arity()),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for PatternMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternMatcher")
            .field("pattern", &self.query.fqn())
            .field("production", &self.production)
            .finish()
    }
}
