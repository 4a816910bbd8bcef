//! Integration tests for Layer 0: Foundation
//!
//! Tests for values, tuples, masks, seeds and tuple indexes.

mod indexes;
mod tuples;
