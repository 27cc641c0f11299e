//! One upgrade pass over a cluster.
//!
//! List members, observe them, decide, and trigger at most once. The pass is
//! generic over its collaborators so it runs the same against the Kubernetes
//! API and against in-memory test doubles.

use std::time::Duration;

use jiff::Timestamp;
use tracing::{debug, info};

use crate::client::{CommandExecutor, MemberDirectory, MemberStateSource};
use crate::controller::cluster_probe::{ClusterSnapshot, ClusterStateProbe};
use crate::controller::error::Error;
use crate::controller::upgrade_coordinator::{SkipReason, UpgradeCoordinator, UpgradeDecision};
use crate::controller::upgrade_guard::trigger_in_flight;
use crate::controller::version_policy::ClusterUpgradeConfig;
use crate::crd::UpgradeTriggerRecord;

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassOutcome {
    PolicyOff,
    NotConverged,
    NoLeader,
    SplitBrain,
    UnknownDesiredVersion,
    UnknownLeaderVersion,
    AlreadyCurrent,
    TriggerInFlight,
    Triggered,
    TriggerFailed,
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::PolicyOff => "PolicyOff",
            PassOutcome::NotConverged => "NotConverged",
            PassOutcome::NoLeader => "NoLeader",
            PassOutcome::SplitBrain => "SplitBrain",
            PassOutcome::UnknownDesiredVersion => "UnknownDesiredVersion",
            PassOutcome::UnknownLeaderVersion => "UnknownLeaderVersion",
            PassOutcome::AlreadyCurrent => "AlreadyCurrent",
            PassOutcome::TriggerInFlight => "TriggerInFlight",
            PassOutcome::Triggered => "Triggered",
            PassOutcome::TriggerFailed => "TriggerFailed",
        }
    }

    /// Whether the upgrade command was sent on this pass.
    pub fn triggered(&self) -> bool {
        matches!(self, PassOutcome::Triggered | PassOutcome::TriggerFailed)
    }
}

impl From<&SkipReason> for PassOutcome {
    fn from(reason: &SkipReason) -> Self {
        match reason {
            SkipReason::PolicyOff => PassOutcome::PolicyOff,
            SkipReason::NotConverged { .. } => PassOutcome::NotConverged,
            SkipReason::NoLeader => PassOutcome::NoLeader,
            SkipReason::SplitBrain { .. } => PassOutcome::SplitBrain,
            SkipReason::UnknownDesiredVersion(_) => PassOutcome::UnknownDesiredVersion,
            SkipReason::UnknownLeaderVersion => PassOutcome::UnknownLeaderVersion,
            SkipReason::AlreadyCurrent { .. } => PassOutcome::AlreadyCurrent,
        }
    }
}

impl std::fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of one pass that come from the resource being reconciled.
#[derive(Debug, Clone)]
pub struct PassInput<'a> {
    pub namespace: &'a str,
    pub cluster_name: &'a str,
    pub config: &'a ClusterUpgradeConfig,
    /// Trigger recorded in the resource status by an earlier pass.
    pub last_trigger: Option<&'a UpgradeTriggerRecord>,
    pub now: Timestamp,
    pub cooldown: Duration,
}

/// Result of one pass.
#[derive(Debug)]
pub struct PassReport {
    pub snapshot: ClusterSnapshot,
    pub decision: UpgradeDecision,
    pub outcome: PassOutcome,
    /// Record of the trigger sent on this pass.
    pub trigger_record: Option<UpgradeTriggerRecord>,
    /// Failure of the trigger sent on this pass.
    pub trigger_error: Option<Error>,
}

/// Run one pass. Only listing members can fail the pass itself; a failed
/// trigger is reported in [`PassReport::trigger_error`].
pub async fn run_upgrade_pass<D, S, E>(
    directory: &D,
    probe: &ClusterStateProbe<S>,
    executor: &E,
    coordinator: &UpgradeCoordinator,
    input: PassInput<'_>,
) -> Result<PassReport, Error>
where
    D: MemberDirectory,
    S: MemberStateSource,
    E: CommandExecutor,
{
    let members = directory
        .list_members(input.namespace, input.cluster_name)
        .await?;
    debug!(
        cluster = %input.cluster_name,
        members = members.len(),
        "Listed cluster members"
    );

    let snapshot = probe.observe(&members).await;
    let decision = coordinator.evaluate(input.config, &snapshot);

    let UpgradeDecision::Trigger(trigger) = &decision else {
        let outcome = decision
            .skip_reason()
            .map(PassOutcome::from)
            .unwrap_or(PassOutcome::AlreadyCurrent);
        return Ok(PassReport {
            snapshot,
            decision,
            outcome,
            trigger_record: None,
            trigger_error: None,
        });
    };

    if trigger_in_flight(
        input.last_trigger,
        trigger.desired.label(),
        input.now,
        input.cooldown,
    ) {
        info!(
            cluster = %input.cluster_name,
            target = %trigger.desired.label(),
            "Upgrade already triggered recently, waiting for it to complete"
        );
        return Ok(PassReport {
            snapshot,
            decision,
            outcome: PassOutcome::TriggerInFlight,
            trigger_record: None,
            trigger_error: None,
        });
    }

    let mut record = UpgradeTriggerRecord {
        target_version: trigger.desired.label().to_string(),
        leader: trigger.leader.name.clone(),
        member_count: i32::try_from(trigger.member_count).unwrap_or(i32::MAX),
        triggered_at: input.now.to_string(),
        succeeded: true,
        message: None,
    };

    let (outcome, trigger_error) = match coordinator.trigger(&decision, executor).await {
        Ok(_) => (PassOutcome::Triggered, None),
        Err(e) => {
            record.succeeded = false;
            record.message = Some(e.to_string());
            (PassOutcome::TriggerFailed, Some(e))
        }
    };

    Ok(PassReport {
        snapshot,
        decision,
        outcome,
        trigger_record: Some(record),
        trigger_error,
    })
}
