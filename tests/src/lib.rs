//! Shared helpers for the feature engine integration tests.

pub mod containers;
pub mod fixtures;
pub mod mocks;
pub mod setup;
