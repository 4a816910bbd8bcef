//! Cross-layer integration tests for Trellis
//!
//! Tests that run complete query libraries against changing models and
//! check that incremental results agree with evaluation from scratch.

mod consistency;
mod derived;
mod network;
mod patterns;
