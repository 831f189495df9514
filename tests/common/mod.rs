//! Shared test utilities for write path, chaos and property tests.
//!
//! This module provides:
//! - A recording persistence queue capturing what the completion pipeline enqueues
//! - A gated storage engine for backpressure tests
//! - Fixtures wiring a leader context to in-memory collaborators

#![allow(dead_code)]

pub mod fixtures;
pub mod recording;

pub use fixtures::*;
pub use recording::*;
