//! Integration tests for Layer 3: Matchers
//!
//! Tests for query construction, normalization, registration and planning.

mod library;
mod planning;
