//! Testing utilities
//!
//! An in-memory transport so the device core can be exercised without a broker.

pub mod mocks;

pub use mocks::*;
