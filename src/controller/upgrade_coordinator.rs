//! Upgrade decision and trigger.
//!
//! Combines the effective upgrade configuration with a cluster snapshot and
//! decides whether the in-place upgrade procedure should run on the leader.
//! Every pass starts idle and ends idle; the only transient state is the
//! single trigger call.
//!
//! ```text
//! Idle --policy off--------------------> Idle
//! Idle --not converged / no leader-----> Idle
//! Idle --converged, already current----> Idle
//! Idle --converged, behind--> Triggering --> Idle
//! ```

use tracing::{debug, info, warn};

use crate::client::{CommandExecutor, PodIdentity};
use crate::controller::cluster_probe::ClusterSnapshot;
use crate::controller::error::Error;
use crate::controller::version_policy::{
    ClusterUpgradeConfig, VersionOrdinal, VersionPolicy, VersionSelection,
};
use crate::crd::UpgradePolicyMode;

/// Default path of the in-place upgrade procedure inside the database container.
pub const DEFAULT_UPGRADE_SCRIPT: &str = "/scripts/inplace_upgrade.py";

/// Why a pass did not trigger an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Upgrade policy is off.
    PolicyOff,
    /// At least one member is not running or could not be read.
    NotConverged { running: usize, members: usize },
    /// No member reported the leader role.
    NoLeader,
    /// More than one member reported the leader role.
    SplitBrain { leaders: usize },
    /// The desired version label has no ordinal.
    UnknownDesiredVersion(String),
    /// The leader did not report a usable server version.
    UnknownLeaderVersion,
    /// Leader already runs the desired version or newer.
    AlreadyCurrent {
        current: VersionOrdinal,
        desired: VersionOrdinal,
    },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::PolicyOff => write!(f, "major version upgrade mode is off"),
            SkipReason::NotConverged { running, members } => {
                write!(f, "{}/{} members running", running, members)
            }
            SkipReason::NoLeader => write!(f, "no leader found"),
            SkipReason::SplitBrain { leaders } => {
                write!(f, "{} members report the leader role", leaders)
            }
            SkipReason::UnknownDesiredVersion(label) => {
                write!(f, "desired version {} is unknown", label)
            }
            SkipReason::UnknownLeaderVersion => write!(f, "leader reported no server version"),
            SkipReason::AlreadyCurrent { current, desired } => {
                write!(f, "leader at {} already satisfies {}", current, desired)
            }
        }
    }
}

/// A pass that should run the upgrade procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeTrigger {
    /// Pod that receives the command.
    pub leader: PodIdentity,
    /// Argument passed to the procedure.
    pub member_count: usize,
    /// Leader's running major version.
    pub current: VersionOrdinal,
    /// Version being upgraded to.
    pub desired: VersionSelection,
    /// Ordinal of `desired`.
    pub desired_ordinal: VersionOrdinal,
}

/// Outcome of [`UpgradeCoordinator::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeDecision {
    Skip {
        reason: SkipReason,
        desired: VersionSelection,
    },
    Trigger(UpgradeTrigger),
}

impl UpgradeDecision {
    pub fn should_trigger(&self) -> bool {
        matches!(self, UpgradeDecision::Trigger(_))
    }

    /// Leader targeted by the trigger.
    pub fn leader(&self) -> Option<&PodIdentity> {
        match self {
            UpgradeDecision::Trigger(trigger) => Some(&trigger.leader),
            UpgradeDecision::Skip { .. } => None,
        }
    }

    /// Member count passed to the trigger.
    pub fn member_count(&self) -> Option<usize> {
        match self {
            UpgradeDecision::Trigger(trigger) => Some(trigger.member_count),
            UpgradeDecision::Skip { .. } => None,
        }
    }

    /// Desired version selected for this pass.
    pub fn desired(&self) -> &VersionSelection {
        match self {
            UpgradeDecision::Trigger(trigger) => &trigger.desired,
            UpgradeDecision::Skip { desired, .. } => desired,
        }
    }

    /// Skip reason, when the pass does not trigger.
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            UpgradeDecision::Skip { reason, .. } => Some(reason),
            UpgradeDecision::Trigger(_) => None,
        }
    }
}

/// Decides on and issues in-place upgrades.
#[derive(Debug, Clone)]
pub struct UpgradeCoordinator {
    policy: VersionPolicy,
    script: String,
}

impl Default for UpgradeCoordinator {
    fn default() -> Self {
        Self::new(VersionPolicy::default(), DEFAULT_UPGRADE_SCRIPT)
    }
}

impl UpgradeCoordinator {
    /// Create a coordinator running `script` on the leader.
    pub fn new(policy: VersionPolicy, script: impl Into<String>) -> Self {
        Self {
            policy,
            script: script.into(),
        }
    }

    /// The version policy in use.
    pub fn policy(&self) -> &VersionPolicy {
        &self.policy
    }

    /// Decide whether this pass should trigger an upgrade.
    ///
    /// Pure: identical inputs give identical decisions.
    pub fn evaluate(
        &self,
        config: &ClusterUpgradeConfig,
        snapshot: &ClusterSnapshot,
    ) -> UpgradeDecision {
        let desired = self.policy.desired_version(config);
        let skip = |reason: SkipReason| UpgradeDecision::Skip {
            reason,
            desired: desired.clone(),
        };

        if config.policy_mode == UpgradePolicyMode::Off {
            return skip(SkipReason::PolicyOff);
        }

        if !snapshot.all_members_running {
            return skip(SkipReason::NotConverged {
                running: snapshot.running_count(),
                members: snapshot.member_count,
            });
        }

        let Some(leader) = snapshot.leader.as_ref() else {
            return skip(SkipReason::NoLeader);
        };

        if snapshot.is_split_brain() {
            return skip(SkipReason::SplitBrain {
                leaders: snapshot.leader_count,
            });
        }

        let Some(desired_ordinal) = self.policy.ordinal_of(desired.label()) else {
            return skip(SkipReason::UnknownDesiredVersion(desired.label().to_string()));
        };

        let Some(current) = leader.reported_version else {
            return skip(SkipReason::UnknownLeaderVersion);
        };

        if current >= desired_ordinal {
            return skip(SkipReason::AlreadyCurrent {
                current,
                desired: desired_ordinal,
            });
        }

        UpgradeDecision::Trigger(UpgradeTrigger {
            leader: leader.identity.clone(),
            member_count: snapshot.member_count,
            current,
            desired,
            desired_ordinal,
        })
    }

    /// Command line of the upgrade procedure for `member_count` members.
    pub fn upgrade_command(&self, member_count: usize) -> Vec<String> {
        vec![
            "python3".to_string(),
            self.script.clone(),
            member_count.to_string(),
        ]
    }

    /// Issue the upgrade command when the decision says so.
    ///
    /// Returns `Ok(false)` for skip decisions. Exactly one command is sent
    /// per call and failures are not retried here.
    pub async fn trigger<E: CommandExecutor>(
        &self,
        decision: &UpgradeDecision,
        executor: &E,
    ) -> Result<bool, Error> {
        let UpgradeDecision::Trigger(trigger) = decision else {
            debug!("No upgrade to trigger");
            return Ok(false);
        };

        info!(
            leader = %trigger.leader,
            members = trigger.member_count,
            current = %trigger.current,
            desired = %trigger.desired.label(),
            "Triggering in-place major version upgrade"
        );

        let command = self.upgrade_command(trigger.member_count);
        match executor.exec(&trigger.leader, command).await {
            Ok(output) => {
                debug!(leader = %trigger.leader, output = %output.trim(), "Upgrade command finished");
                Ok(true)
            }
            Err(e) => {
                warn!(leader = %trigger.leader, error = %e, "Upgrade command failed");
                Err(Error::Execution {
                    pod: trigger.leader.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}
