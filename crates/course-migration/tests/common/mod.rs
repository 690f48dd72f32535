//! Shared test utilities for course-migration integration tests.
//!
//! This module provides:
//! - Fake host-platform collaborators (catalog, packager, notifier, policy)
//! - `TestHarness` wiring them to a temp-dir storage and in-memory store

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
