//! Clients for the cluster members managed by the operator.
//!
//! ## Architecture
//!
//! - `types`: Member identity, role, running state and collaborator errors
//! - `members`: Collaborator traits plus the Kubernetes pod implementation
//!   (label-selected listing and exec subresource)
//! - `patroni`: Patroni REST API client reporting per-member state
//!
//! ## Example
//!
//! ```rust,ignore
//! use pg_upgrade_operator::client::{MemberStateSource, PatroniClient, PodIdentity};
//!
//! let patroni = PatroniClient::new(8008, Duration::from_secs(5))?;
//! let pod = PodIdentity::new("db", "orders-0").with_address("10.0.0.4");
//! let state = patroni.member_state(&pod).await?;
//! ```

pub mod members;
pub mod patroni;
pub mod types;

pub use members::{CommandExecutor, KubePods, MemberDirectory, MemberStateSource};
pub use patroni::{DEFAULT_PATRONI_PORT, PatroniClient, PatroniMemberData};
pub use types::{MemberError, MemberRole, MemberState, PodIdentity, RunningState};
