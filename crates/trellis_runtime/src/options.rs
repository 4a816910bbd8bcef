//! Configuration for the query engine.

use trellis_base::{BaseIndexOptions, IndexingLevel};
use trellis_rete::Logic;

/// Configuration for a [`crate::QueryEngine`].
#[derive(Clone, Debug, Default)]
pub struct EngineOptions {
    /// Options of the base index the engine creates.
    pub base: BaseIndexOptions,

    /// Timestamp propagation through the network.
    pub logic: Logic,

    /// Queue network updates until the end of each model notification batch
    /// instead of propagating every tuple delta immediately.
    pub delay_updates: bool,
}

impl EngineOptions {
    /// Indexes every class, feature and data type at `FULL` level.
    #[must_use]
    pub fn wildcard() -> Self {
        Self {
            base: BaseIndexOptions::wildcard(),
            ..Self::default()
        }
    }

    /// Builder method to set the base index options.
    #[must_use]
    pub fn with_base(mut self, base: BaseIndexOptions) -> Self {
        self.base = base;
        self
    }

    /// Builder method to set the wildcard level of the base index.
    #[must_use]
    pub fn with_wildcard_level(mut self, level: IndexingLevel) -> Self {
        self.base.wildcard_level = level;
        self
    }

    /// Builder method to select the timestamp logic.
    #[must_use]
    pub fn with_logic(mut self, logic: Logic) -> Self {
        self.logic = logic;
        self
    }

    /// Builder method to delay network updates.
    #[must_use]
    pub fn with_delay_updates(mut self, delay: bool) -> Self {
        self.delay_updates = delay;
        self
    }
}
