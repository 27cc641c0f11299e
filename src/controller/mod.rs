//! Controller module for pg-upgrade-operator.
//!
//! Contains the reconciliation loop, the upgrade decision core, error
//! handling and status management.

// Shared modules
pub mod context;
pub mod error;
pub mod status;

// Upgrade core
pub mod cluster_probe;
pub mod upgrade_coordinator;
pub mod upgrade_guard;
pub mod upgrade_pass;
pub mod version_policy;

// PostgresCluster controller
pub mod reconciler;
