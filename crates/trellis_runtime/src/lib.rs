//! Query engine over an observable model for Trellis.
//!
//! This crate provides:
//! - [`ModelRuntimeContext`] - Serves input keys from a base index
//! - [`QueryEngine`] - Owns the index and the shared network
//! - [`PatternMatcher`] - Current matches and change listeners of one query
//! - [`Match`] - A result row addressable by parameter name

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod context;
pub mod engine;
pub mod matcher;
pub mod options;
pub mod pattern_match;

pub use context::ModelRuntimeContext;
pub use engine::QueryEngine;
pub use matcher::{ListenerId, MatchUpdateListener, PatternMatcher};
pub use options::EngineOptions;
pub use pattern_match::Match;
