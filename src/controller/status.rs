//! Status management utilities.
//!
//! Builds the PostgresCluster status conditions from the result of a pass.

use crate::controller::upgrade_pass::{PassOutcome, PassReport};
use crate::crd::{Condition, ConditionType};

/// Builder for managing conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Start from existing conditions.
    pub fn from_existing(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
        }
    }

    /// Add or update a condition.
    ///
    /// The transition time is kept when the status did not change.
    pub fn set(&mut self, mut condition: Condition) -> &mut Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set Converged condition
    pub fn converged(
        &mut self,
        converged: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::converged(converged, reason, message, generation))
    }

    /// Set MajorVersionCurrent condition
    pub fn version_current(
        &mut self,
        current: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::version_current(current, reason, message, generation))
    }

    /// Set UpgradeTriggered condition
    pub fn upgrade_triggered(
        &mut self,
        triggered: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::upgrade_triggered(
            triggered, reason, message, generation,
        ))
    }

    /// Set all conditions derived from a pass.
    pub fn apply_pass(&mut self, report: &PassReport, generation: Option<i64>) -> &mut Self {
        let snapshot = &report.snapshot;
        let summary = snapshot.summary();

        let converged_reason = if snapshot.is_converged() {
            "AllMembersRunning"
        } else if !snapshot.all_members_running {
            "MembersNotRunning"
        } else if snapshot.is_split_brain() {
            "MultipleLeaders"
        } else {
            "NoLeader"
        };
        self.converged(snapshot.is_converged(), converged_reason, &summary, generation);

        let desired = report.decision.desired().label();
        match report.outcome {
            PassOutcome::AlreadyCurrent => {
                self.version_current(
                    true,
                    "LeaderCurrent",
                    &format!("Leader runs major version {} or newer", desired),
                    generation,
                );
            }
            PassOutcome::TriggerInFlight | PassOutcome::Triggered | PassOutcome::TriggerFailed => {
                self.version_current(
                    false,
                    "LeaderBehind",
                    &format!("Leader is behind major version {}", desired),
                    generation,
                );
            }
            other => {
                let message = report
                    .decision
                    .skip_reason()
                    .map(|r| r.to_string())
                    .unwrap_or_default();
                self.version_current(false, other.as_str(), &message, generation);
            }
        }

        match (&report.outcome, &report.trigger_record) {
            (PassOutcome::Triggered, Some(record)) => {
                self.upgrade_triggered(
                    true,
                    "Triggered",
                    &format!(
                        "Upgrade to {} started on {} with {} members",
                        record.target_version, record.leader, record.member_count
                    ),
                    generation,
                );
            }
            (PassOutcome::TriggerFailed, Some(record)) => {
                self.upgrade_triggered(
                    false,
                    "TriggerFailed",
                    record.message.as_deref().unwrap_or("Upgrade command failed"),
                    generation,
                );
            }
            (PassOutcome::TriggerInFlight, _) => {
                self.upgrade_triggered(
                    true,
                    "TriggerInFlight",
                    &format!("Upgrade to {} in progress", desired),
                    generation,
                );
            }
            _ => {
                self.upgrade_triggered(false, report.outcome.as_str(), "No upgrade needed", generation);
            }
        }
        self
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type.as_str())
        .is_some_and(|c| c.status == "True")
}

/// Get the reason for a condition
pub fn get_condition_reason(conditions: &[Condition], condition_type: ConditionType) -> Option<&str> {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type.as_str())
        .map(|c| c.reason.as_str())
}
