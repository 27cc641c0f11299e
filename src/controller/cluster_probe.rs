//! Cluster state observation.
//!
//! Queries every member once per pass and folds the answers into a
//! [`ClusterSnapshot`]. A member that cannot be read counts as not running,
//! which blocks any upgrade for that pass.

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::client::{MemberRole, MemberStateSource, PodIdentity, RunningState};
use crate::controller::version_policy::VersionOrdinal;

/// Default bound on a single member query.
pub const DEFAULT_MEMBER_TIMEOUT: Duration = Duration::from_secs(5);

/// State of one member as seen during this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberObservation {
    pub identity: PodIdentity,
    pub role: MemberRole,
    pub running: RunningState,
    /// Major-version ordinal derived from the reported server version.
    pub reported_version: Option<VersionOrdinal>,
    /// Raw server version number as reported.
    pub server_version: Option<u32>,
}

impl MemberObservation {
    /// Observation for a member whose state could not be read.
    pub fn unreachable(identity: PodIdentity) -> Self {
        Self {
            identity,
            role: MemberRole::Unknown,
            running: RunningState::NotRunning,
            reported_version: None,
            server_version: None,
        }
    }

    /// Whether the member reported itself running.
    pub fn is_running(&self) -> bool {
        self.running == RunningState::Running
    }
}

/// Point-in-time view of the whole cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSnapshot {
    /// False as soon as one member is not running or unreadable.
    pub all_members_running: bool,
    /// First member, in listing order, that reported the leader role.
    pub leader: Option<MemberObservation>,
    /// Number of members listed.
    pub member_count: usize,
    /// Number of members that reported the leader role.
    pub leader_count: usize,
    /// Every member observation, in listing order.
    pub members: Vec<MemberObservation>,
}

impl ClusterSnapshot {
    /// Fold member observations into a snapshot.
    pub fn from_observations(members: Vec<MemberObservation>) -> Self {
        let mut all_members_running = true;
        let mut leader: Option<MemberObservation> = None;
        let mut leader_count = 0;

        for member in &members {
            if !member.is_running() {
                all_members_running = false;
            }
            if member.role == MemberRole::Leader {
                leader_count += 1;
                if leader.is_none() {
                    leader = Some(member.clone());
                }
            }
        }

        Self {
            all_members_running,
            leader,
            member_count: members.len(),
            leader_count,
            members,
        }
    }

    /// Number of running members.
    pub fn running_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_running()).count()
    }

    /// More than one member claims to be leader.
    pub fn is_split_brain(&self) -> bool {
        self.leader_count > 1
    }

    /// All members running and exactly one leader.
    pub fn is_converged(&self) -> bool {
        self.all_members_running && self.leader.is_some() && !self.is_split_brain()
    }

    /// Human-readable summary for status conditions.
    pub fn summary(&self) -> String {
        let leader = self
            .leader
            .as_ref()
            .map(|l| l.identity.name.as_str())
            .unwrap_or("none");
        format!(
            "{}/{} members running, leader: {}",
            self.running_count(),
            self.member_count,
            leader
        )
    }
}

/// Observes cluster members through a [`MemberStateSource`].
#[derive(Debug, Clone)]
pub struct ClusterStateProbe<S> {
    source: S,
    member_timeout: Duration,
}

impl<S: MemberStateSource> ClusterStateProbe<S> {
    /// Create a probe that bounds each member query by `member_timeout`.
    pub fn new(source: S, member_timeout: Duration) -> Self {
        Self {
            source,
            member_timeout,
        }
    }

    /// Query all members concurrently and build a snapshot.
    ///
    /// Performs no mutation. Failed or timed-out queries count the member as
    /// not running.
    pub async fn observe(&self, members: &[PodIdentity]) -> ClusterSnapshot {
        let observations = join_all(members.iter().map(|m| self.observe_member(m))).await;
        let snapshot = ClusterSnapshot::from_observations(observations);

        if snapshot.is_split_brain() {
            warn!(
                leaders = snapshot.leader_count,
                members = snapshot.member_count,
                "Multiple members report the leader role"
            );
        }
        debug!(summary = %snapshot.summary(), "Observed cluster state");
        snapshot
    }

    async fn observe_member(&self, member: &PodIdentity) -> MemberObservation {
        match tokio::time::timeout(self.member_timeout, self.source.member_state(member)).await {
            Ok(Ok(state)) => MemberObservation {
                identity: member.clone(),
                role: state.role,
                running: state.running,
                reported_version: state
                    .server_version
                    .and_then(VersionOrdinal::from_server_version),
                server_version: state.server_version,
            },
            Ok(Err(e)) => {
                warn!(member = %member, error = %e, "Failed to read member state, treating as not running");
                MemberObservation::unreachable(member.clone())
            }
            Err(_) => {
                warn!(
                    member = %member,
                    timeout = ?self.member_timeout,
                    "Member state query timed out, treating as not running"
                );
                MemberObservation::unreachable(member.clone())
            }
        }
    }
}
