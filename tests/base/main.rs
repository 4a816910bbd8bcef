//! Integration tests for Layer 2: Base index
//!
//! Tests for indexing levels, queries, listeners and traversal coalescing.

mod levels;
mod listeners;
