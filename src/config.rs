//! Operator configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

use crate::client::DEFAULT_PATRONI_PORT;
use crate::controller::cluster_probe::DEFAULT_MEMBER_TIMEOUT;
use crate::controller::upgrade_coordinator::DEFAULT_UPGRADE_SCRIPT;
use crate::controller::upgrade_guard::DEFAULT_RETRIGGER_COOLDOWN;
use crate::controller::version_policy::ClusterUpgradeConfig;
use crate::crd::{PostgresCluster, UpgradePolicyMode};

/// Default operator-wide target major version.
pub const DEFAULT_TARGET_MAJOR_VERSION: &str = "17";
/// Default pod label carrying the cluster name.
pub const DEFAULT_CLUSTER_NAME_LABEL: &str = "cluster-name";
/// Default container that runs the upgrade procedure.
pub const DEFAULT_POSTGRES_CONTAINER: &str = "postgres";
/// Default bound on the upgrade command.
pub const DEFAULT_UPGRADE_EXEC_TIMEOUT: Duration = Duration::from_secs(600);

/// Invalid configuration value.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Operator-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Upgrade mode for clusters that do not set their own.
    pub upgrade_mode: UpgradePolicyMode,
    /// Major version `full` mode upgrades towards.
    pub target_major_version: String,
    /// Label selecting the pods of a cluster.
    pub cluster_name_label: String,
    /// Patroni REST API port on every member.
    pub patroni_port: u16,
    /// Bound on a single member state query.
    pub member_query_timeout: Duration,
    /// Bound on the upgrade command.
    pub upgrade_exec_timeout: Duration,
    /// Path of the upgrade procedure inside the container.
    pub upgrade_script: String,
    /// Container the upgrade command runs in.
    pub postgres_container: String,
    /// Window in which a successful trigger is not repeated.
    pub retrigger_cooldown: Duration,
    /// Namespace to watch; cluster-wide when `None`.
    pub watch_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            upgrade_mode: UpgradePolicyMode::Off,
            target_major_version: DEFAULT_TARGET_MAJOR_VERSION.to_string(),
            cluster_name_label: DEFAULT_CLUSTER_NAME_LABEL.to_string(),
            patroni_port: DEFAULT_PATRONI_PORT,
            member_query_timeout: DEFAULT_MEMBER_TIMEOUT,
            upgrade_exec_timeout: DEFAULT_UPGRADE_EXEC_TIMEOUT,
            upgrade_script: DEFAULT_UPGRADE_SCRIPT.to_string(),
            postgres_container: DEFAULT_POSTGRES_CONTAINER.to_string(),
            retrigger_cooldown: DEFAULT_RETRIGGER_COOLDOWN,
            watch_namespace: None,
        }
    }
}

impl OperatorConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variables. Unset or blank variables
    /// take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let upgrade_mode = match get("MAJOR_VERSION_UPGRADE_MODE") {
            Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                key: "MAJOR_VERSION_UPGRADE_MODE",
                value,
                reason,
            })?,
            None => defaults.upgrade_mode,
        };

        Ok(Self {
            upgrade_mode,
            target_major_version: get("TARGET_MAJOR_VERSION")
                .unwrap_or(defaults.target_major_version),
            cluster_name_label: get("CLUSTER_NAME_LABEL").unwrap_or(defaults.cluster_name_label),
            patroni_port: parse_number("PATRONI_API_PORT", get("PATRONI_API_PORT"))?
                .unwrap_or(defaults.patroni_port),
            member_query_timeout: parse_secs(
                "MEMBER_QUERY_TIMEOUT_SECS",
                get("MEMBER_QUERY_TIMEOUT_SECS"),
            )?
            .unwrap_or(defaults.member_query_timeout),
            upgrade_exec_timeout: parse_secs(
                "UPGRADE_EXEC_TIMEOUT_SECS",
                get("UPGRADE_EXEC_TIMEOUT_SECS"),
            )?
            .unwrap_or(defaults.upgrade_exec_timeout),
            upgrade_script: get("UPGRADE_SCRIPT").unwrap_or(defaults.upgrade_script),
            postgres_container: get("POSTGRES_CONTAINER").unwrap_or(defaults.postgres_container),
            retrigger_cooldown: parse_number::<u64>(
                "UPGRADE_RETRIGGER_COOLDOWN_SECS",
                get("UPGRADE_RETRIGGER_COOLDOWN_SECS"),
            )?
            .map(Duration::from_secs)
            .unwrap_or(defaults.retrigger_cooldown),
            watch_namespace: get("WATCH_NAMESPACE"),
        })
    }

    /// Effective upgrade configuration of one cluster.
    ///
    /// A mode set on the cluster wins over the operator-wide mode.
    pub fn cluster_upgrade_config(&self, cluster: &PostgresCluster) -> ClusterUpgradeConfig {
        let policy_mode = cluster
            .spec
            .major_version_upgrade
            .as_ref()
            .and_then(|u| u.mode)
            .unwrap_or(self.upgrade_mode);

        ClusterUpgradeConfig {
            configured_version: cluster.spec.postgres_version.trim().to_string(),
            policy_mode,
            target_version: self.target_major_version.clone(),
        }
    }
}

fn parse_number<T>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                value: v.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Positive number of seconds.
fn parse_secs(key: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    match parse_number::<u64>(key, value)? {
        Some(0) => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other.map(Duration::from_secs)),
    }
}
