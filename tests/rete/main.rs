//! Integration tests for Layer 4: Rete
//!
//! Tests for compiling queries into networks fed from a live model.

mod builder;
mod network;
