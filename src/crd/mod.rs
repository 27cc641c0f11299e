//! Custom Resource Definitions (CRDs) for pg-upgrade-operator.
//!
//! - `PostgresCluster`: a Patroni-managed PostgreSQL cluster and its upgrade status

mod postgres_cluster;

pub use postgres_cluster::*;
