// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for upgrade passes.
//!
//! These tests drive complete passes (list, observe, decide, trigger) against
//! an in-memory cluster WITHOUT requiring a live Kubernetes cluster or
//! Patroni.
//!
//! ```bash
//! cargo test --test functional
//! ```

#[path = "../common/fixtures.rs"]
mod fixtures;
mod mock_state;
mod scenario_tests;

pub use mock_state::*;
