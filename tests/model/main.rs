//! Integration tests for Layer 1: Model
//!
//! Tests for the metamodel, object graph and change notifications.

mod graph;
mod notifications;
