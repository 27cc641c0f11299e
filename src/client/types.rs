//! Types describing cluster members and their reported state.
//!
//! These are the values exchanged with the orchestration collaborators:
//! the pod listing, the Patroni member API and the pod exec subresource.

use thiserror::Error;

/// Errors returned by member collaborators.
#[derive(Error, Debug)]
pub enum MemberError {
    #[error("Member {0} has no pod IP")]
    NoAddress(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Command exited unsuccessfully: {0}")]
    CommandFailed(String),
}

/// Namespaced identity of a cluster member pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodIdentity {
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub name: String,
    /// Pod IP, used to reach the Patroni API.
    pub address: Option<String>,
}

impl PodIdentity {
    /// Create an identity without a known address.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            address: None,
        }
    }

    /// Attach the pod IP.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

impl std::fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Replication role reported by a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRole {
    /// Member accepts writes.
    Leader,
    /// Member streams from the leader.
    Replica,
    /// Role could not be determined.
    Unknown,
}

impl MemberRole {
    /// Map a Patroni role string.
    ///
    /// A standby leader follows a remote primary and is reported as a replica,
    /// so standby clusters never present a leader to upgrade.
    pub fn from_patroni(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "master" | "primary" => MemberRole::Leader,
            "replica" | "standby_leader" | "sync_standby" => MemberRole::Replica,
            _ => MemberRole::Unknown,
        }
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberRole::Leader => write!(f, "leader"),
            MemberRole::Replica => write!(f, "replica"),
            MemberRole::Unknown => write!(f, "unknown"),
        }
    }
}

/// Whether the member's PostgreSQL instance is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunningState {
    Running,
    NotRunning,
}

impl RunningState {
    /// Map a Patroni state string. Only "running" counts as running.
    pub fn from_patroni(state: &str) -> Self {
        if state.trim().eq_ignore_ascii_case("running") {
            RunningState::Running
        } else {
            RunningState::NotRunning
        }
    }
}

impl std::fmt::Display for RunningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunningState::Running => write!(f, "running"),
            RunningState::NotRunning => write!(f, "not running"),
        }
    }
}

/// State reported by a single member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberState {
    pub role: MemberRole,
    pub running: RunningState,
    /// PostgreSQL server version number (e.g. 150004), when reported.
    pub server_version: Option<u32>,
}
