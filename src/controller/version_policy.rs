//! Major version ordering and desired-version selection.
//!
//! Version labels ("9.6", "13", ...) are opaque strings. They are ordered only
//! through a [`VersionOrdinalTable`]; a label missing from the table has no
//! ordinal, and every comparison involving it answers "not newer".

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::crd::UpgradePolicyMode;

/// Comparable encoding of a PostgreSQL major version.
///
/// Uses the `PG_VERSION_NUM` scale with the minor part zeroed, so that
/// `"13"` maps to `130000` and `"9.6"` to `90600`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionOrdinal(u32);

impl VersionOrdinal {
    /// Wrap a raw ordinal.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw ordinal value.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Major-version ordinal of a reported server version number.
    ///
    /// Since PostgreSQL 10 the major version is `num / 10000`; before that it
    /// was the first two components (`90624` is 9.6). Numbers below 8.0 are
    /// not server versions and yield `None`.
    pub fn from_server_version(num: u32) -> Option<Self> {
        match num {
            n if n < MIN_SERVER_VERSION => None,
            n if n >= 100_000 => Some(Self(n / 10_000 * 10_000)),
            n => Some(Self(n / 100 * 100)),
        }
    }
}

impl std::fmt::Display for VersionOrdinal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Smallest number the server reports as `server_version_num` (8.0).
const MIN_SERVER_VERSION: u32 = 80_000;

/// Immutable mapping from version label to ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionOrdinalTable {
    entries: BTreeMap<String, VersionOrdinal>,
}

impl VersionOrdinalTable {
    /// Build a table from `(label, ordinal)` pairs.
    pub fn from_entries<I, L>(entries: I) -> Self
    where
        I: IntoIterator<Item = (L, u32)>,
        L: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(label, ordinal)| (label.into(), VersionOrdinal(ordinal)))
                .collect(),
        }
    }

    /// Table of the PostgreSQL major versions the operator can upgrade between.
    pub fn postgres() -> Self {
        Self::from_entries([
            ("9.5", 90_500),
            ("9.6", 90_600),
            ("10", 100_000),
            ("11", 110_000),
            ("12", 120_000),
            ("13", 130_000),
            ("14", 140_000),
            ("15", 150_000),
            ("16", 160_000),
            ("17", 170_000),
        ])
    }

    /// Look up a label. `None` means the label is unknown.
    pub fn get(&self, label: &str) -> Option<VersionOrdinal> {
        self.entries.get(label.trim()).copied()
    }

    /// Known labels, in lexical order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Label of an ordinal, if the table has one.
    pub fn label_of(&self, ordinal: VersionOrdinal) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, o)| **o == ordinal)
            .map(|(label, _)| label.as_str())
    }
}

impl Default for VersionOrdinalTable {
    fn default() -> Self {
        Self::postgres()
    }
}

/// Upgrade-relevant configuration of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterUpgradeConfig {
    /// Major version configured on the cluster.
    pub configured_version: String,
    /// Effective upgrade policy.
    pub policy_mode: UpgradePolicyMode,
    /// Operator-wide target major version.
    pub target_version: String,
}

/// Result of desired-version selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSelection {
    label: String,
    overridden_from: Option<String>,
}

impl VersionSelection {
    /// Selected major version label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Configured version replaced by the operator-wide target, if any.
    pub fn overridden_from(&self) -> Option<&str> {
        self.overridden_from.as_deref()
    }

    /// Whether the operator-wide target replaced the configured version.
    pub fn is_override(&self) -> bool {
        self.overridden_from.is_some()
    }
}

/// Version ordering and the desired-version rule.
#[derive(Debug, Clone, Default)]
pub struct VersionPolicy {
    table: Arc<VersionOrdinalTable>,
}

impl VersionPolicy {
    /// Create a policy over `table`.
    pub fn new(table: VersionOrdinalTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    /// The ordinal table in use.
    pub fn table(&self) -> &VersionOrdinalTable {
        &self.table
    }

    /// Ordinal of `label`, or `None` when the label is unknown.
    pub fn ordinal_of(&self, label: &str) -> Option<VersionOrdinal> {
        self.table.get(label)
    }

    /// Whether `candidate` is strictly newer than `current`.
    ///
    /// Unknown labels on either side are never newer.
    pub fn is_newer(&self, current: &str, candidate: &str) -> bool {
        match (self.ordinal_of(current), self.ordinal_of(candidate)) {
            (Some(current), Some(candidate)) => candidate > current,
            _ => false,
        }
    }

    /// Major version the cluster should run.
    ///
    /// Only `Full` mode may replace the configured version, and only with a
    /// strictly newer target. The configuration itself is never modified.
    pub fn desired_version(&self, config: &ClusterUpgradeConfig) -> VersionSelection {
        if config.policy_mode == UpgradePolicyMode::Full
            && self.is_newer(&config.configured_version, &config.target_version)
        {
            return VersionSelection {
                label: config.target_version.clone(),
                overridden_from: Some(config.configured_version.clone()),
            };
        }

        VersionSelection {
            label: config.configured_version.clone(),
            overridden_from: None,
        }
    }

    /// Ordinal of the desired version, or `None` when it is unknown.
    pub fn desired_version_ordinal(&self, config: &ClusterUpgradeConfig) -> Option<VersionOrdinal> {
        self.ordinal_of(self.desired_version(config).label())
    }
}
