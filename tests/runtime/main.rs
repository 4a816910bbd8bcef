//! Integration tests for Layer 5: Runtime
//!
//! Tests for query engines, pattern matchers and match listeners.

mod engine;
mod fixture;
mod matcher;
