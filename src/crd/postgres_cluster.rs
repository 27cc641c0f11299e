//! PostgresCluster Custom Resource Definition.
//!
//! Describes a Patroni-managed PostgreSQL cluster whose pods are provisioned
//! elsewhere. The operator only reads the configured major version and
//! reports upgrade progress in the status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// PostgresCluster is a custom resource describing a replicated PostgreSQL cluster.
///
/// Example:
/// ```yaml
/// apiVersion: pgoperator.smoketurner.com/v1alpha1
/// kind: PostgresCluster
/// metadata:
///   name: orders-db
/// spec:
///   postgresVersion: "15"
///   numberOfInstances: 3
///   majorVersionUpgrade:
///     mode: full
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "pgoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "PostgresCluster",
    plural = "postgresclusters",
    shortname = "pgc",
    status = "PostgresClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.postgresVersion"}"#,
    printcolumn = r#"{"name":"Instances", "type":"integer", "jsonPath":".spec.numberOfInstances"}"#,
    printcolumn = r#"{"name":"Current", "type":"integer", "jsonPath":".status.currentMajorVersion"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterSpec {
    /// Configured PostgreSQL major version (e.g. "15").
    pub postgres_version: String,

    /// Number of cluster members (leader plus replicas).
    #[serde(default = "default_number_of_instances")]
    pub number_of_instances: i32,

    /// Per-cluster override of the operator-wide upgrade policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_version_upgrade: Option<MajorVersionUpgradeSpec>,
}

fn default_number_of_instances() -> i32 {
    1
}

/// Per-cluster upgrade policy settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MajorVersionUpgradeSpec {
    /// Upgrade mode for this cluster. Falls back to the operator-wide mode when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<UpgradePolicyMode>,
}

/// Automatic major version upgrade policy.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UpgradePolicyMode {
    /// Never upgrade automatically.
    #[default]
    Off,
    /// Upgrade towards the configured version only.
    Manual,
    /// Upgrade towards the operator-wide target version when it is newer.
    Full,
}

impl std::fmt::Display for UpgradePolicyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradePolicyMode::Off => write!(f, "off"),
            UpgradePolicyMode::Manual => write!(f, "manual"),
            UpgradePolicyMode::Full => write!(f, "full"),
        }
    }
}

impl std::str::FromStr for UpgradePolicyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(UpgradePolicyMode::Off),
            "manual" => Ok(UpgradePolicyMode::Manual),
            "full" => Ok(UpgradePolicyMode::Full),
            other => Err(format!("Unknown major version upgrade mode: {}", other)),
        }
    }
}

/// Status of a PostgresCluster as seen by the upgrade operator.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterStatus {
    /// Server version number last reported by the leader (e.g. 150004).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_major_version: Option<i64>,

    /// Major version the operator wants the cluster to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_major_version: Option<String>,

    /// Number of members observed on the last pass.
    #[serde(default)]
    pub member_count: i32,

    /// Pod name of the leader observed on the last pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,

    /// Record of the most recent upgrade trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_upgrade_trigger: Option<UpgradeTriggerRecord>,

    /// Observed generation of the PostgresCluster spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions representing the current state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Record of an issued in-place upgrade command.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeTriggerRecord {
    /// Major version the upgrade was triggered towards.
    pub target_version: String,

    /// Pod the command was executed in.
    pub leader: String,

    /// Member count passed to the upgrade procedure.
    pub member_count: i32,

    /// RFC 3339 timestamp of the trigger.
    pub triggered_at: String,

    /// Whether the command was dispatched and exited successfully.
    pub succeeded: bool,

    /// Error message when the command failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Condition describes the state of a cluster at a certain point.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Converged" condition.
    pub fn converged(converged: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(ConditionType::Converged.as_str(), converged, reason, message, generation)
    }

    /// Create a "MajorVersionCurrent" condition.
    pub fn version_current(
        current: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new(
            ConditionType::MajorVersionCurrent.as_str(),
            current,
            reason,
            message,
            generation,
        )
    }

    /// Create an "UpgradeTriggered" condition.
    pub fn upgrade_triggered(
        triggered: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new(
            ConditionType::UpgradeTriggered.as_str(),
            triggered,
            reason,
            message,
            generation,
        )
    }
}

/// Condition types reported on a PostgresCluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionType {
    /// All members running with exactly one leader.
    Converged,
    /// Leader runs at or above the desired major version.
    MajorVersionCurrent,
    /// An in-place upgrade was triggered on the last pass.
    UpgradeTriggered,
}

impl ConditionType {
    /// Wire name of the condition type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Converged => "Converged",
            ConditionType::MajorVersionCurrent => "MajorVersionCurrent",
            ConditionType::UpgradeTriggered => "UpgradeTriggered",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
