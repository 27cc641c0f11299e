// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for pg-upgrade-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

#[path = "../common/fixtures.rs"]
mod fixtures;

mod crd_tests {
    use kube::CustomResourceExt;
    use pg_upgrade_operator::crd::{
        Condition, PostgresCluster, PostgresClusterStatus, UpgradePolicyMode,
    };

    use crate::fixtures::PostgresClusterBuilder;

    #[test]
    fn test_crd_metadata() {
        let crd = PostgresCluster::crd();
        assert_eq!(crd.spec.group, "pgoperator.smoketurner.com");
        assert_eq!(crd.spec.names.kind, "PostgresCluster");
        assert_eq!(crd.spec.names.plural, "postgresclusters");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(
            crd.spec.names.short_names.as_deref(),
            Some(&["pgc".to_string()][..])
        );
    }

    #[test]
    fn test_spec_serializes_camel_case() {
        let cluster = PostgresClusterBuilder::new("orders-db")
            .version("15")
            .mode(UpgradePolicyMode::Manual)
            .build();
        let json = serde_json::to_value(&cluster.spec).unwrap();
        assert_eq!(json["postgresVersion"], "15");
        assert_eq!(json["numberOfInstances"], 3);
        assert_eq!(json["majorVersionUpgrade"]["mode"], "manual");
    }

    #[test]
    fn test_status_defaults() {
        let status: PostgresClusterStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status.member_count, 0);
        assert!(status.leader.is_none());
        assert!(status.conditions.is_empty());
    }

    #[test]
    fn test_condition_types() {
        let condition = Condition::upgrade_triggered(true, "Triggered", "started", Some(1));
        assert_eq!(condition.r#type, "UpgradeTriggered");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "Triggered");
        assert!(!condition.last_transition_time.is_empty());
    }
}

mod version_policy_tests {
    use pg_upgrade_operator::controller::version_policy::{
        ClusterUpgradeConfig, VersionOrdinal, VersionOrdinalTable, VersionPolicy,
    };
    use pg_upgrade_operator::crd::UpgradePolicyMode;

    #[test]
    fn test_default_table_labels() {
        let table = VersionOrdinalTable::default();
        let labels: Vec<&str> = table.labels().collect();
        assert!(labels.contains(&"9.6"));
        assert!(labels.contains(&"17"));
        assert_eq!(table.label_of(VersionOrdinal::new(130_000)), Some("13"));
    }

    #[test]
    fn test_whitespace_around_labels_is_ignored() {
        let policy = VersionPolicy::default();
        assert_eq!(policy.ordinal_of(" 14 "), policy.ordinal_of("14"));
    }

    #[test]
    fn test_full_mode_selects_target() {
        let policy = VersionPolicy::default();
        let selection = policy.desired_version(&ClusterUpgradeConfig {
            configured_version: "9.6".to_string(),
            policy_mode: UpgradePolicyMode::Full,
            target_version: "16".to_string(),
        });
        assert_eq!(selection.label(), "16");
        assert_eq!(selection.overridden_from(), Some("9.6"));
    }

    #[test]
    fn test_server_version_reduction_matches_table() {
        let table = VersionOrdinalTable::postgres();
        assert_eq!(VersionOrdinal::from_server_version(90_624), table.get("9.6"));
        assert_eq!(VersionOrdinal::from_server_version(170_002), table.get("17"));
    }
}

mod client_tests {
    use pg_upgrade_operator::client::{
        MemberRole, MemberState, PatroniMemberData, PodIdentity, RunningState,
    };

    #[test]
    fn test_patroni_roles() {
        assert_eq!(MemberRole::from_patroni("master"), MemberRole::Leader);
        assert_eq!(MemberRole::from_patroni("primary"), MemberRole::Leader);
        assert_eq!(MemberRole::from_patroni("replica"), MemberRole::Replica);
        assert_eq!(MemberRole::from_patroni("standby_leader"), MemberRole::Replica);
        assert_eq!(MemberRole::from_patroni("uninitialized"), MemberRole::Unknown);
    }

    #[test]
    fn test_patroni_states() {
        assert_eq!(RunningState::from_patroni("running"), RunningState::Running);
        assert_eq!(RunningState::from_patroni("starting"), RunningState::NotRunning);
        assert_eq!(RunningState::from_patroni("stopped"), RunningState::NotRunning);
    }

    #[test]
    fn test_member_data_conversion() {
        let data: PatroniMemberData = serde_json::from_str(
            r#"{"state":"running","role":"replica","server_version":130011}"#,
        )
        .unwrap();
        let state = MemberState::from(data);
        assert_eq!(state.role, MemberRole::Replica);
        assert_eq!(state.server_version, Some(130_011));
    }

    #[test]
    fn test_pod_identity_display() {
        let pod = PodIdentity::new("databases", "orders-db-0").with_address("10.0.0.7");
        assert_eq!(pod.to_string(), "databases/orders-db-0");
        assert_eq!(pod.address.as_deref(), Some("10.0.0.7"));
    }
}

mod config_tests {
    use std::time::Duration;

    use pg_upgrade_operator::crd::UpgradePolicyMode;
    use pg_upgrade_operator::{ConfigError, OperatorConfig};

    use crate::fixtures::PostgresClusterBuilder;

    #[test]
    fn test_lookup_with_defaults() {
        let config = OperatorConfig::from_lookup(|key| match key {
            "MAJOR_VERSION_UPGRADE_MODE" => Some("Manual".to_string()),
            "UPGRADE_EXEC_TIMEOUT_SECS" => Some("120".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.upgrade_mode, UpgradePolicyMode::Manual);
        assert_eq!(config.upgrade_exec_timeout, Duration::from_secs(120));
        assert_eq!(config.cluster_name_label, "cluster-name");
    }

    #[test]
    fn test_invalid_timeout() {
        let err = OperatorConfig::from_lookup(|key| {
            (key == "MEMBER_QUERY_TIMEOUT_SECS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("MEMBER_QUERY_TIMEOUT_SECS"));
    }

    #[test]
    fn test_cluster_upgrade_config_inherits_mode() {
        let config = OperatorConfig {
            upgrade_mode: UpgradePolicyMode::Full,
            ..OperatorConfig::default()
        };
        let cluster = PostgresClusterBuilder::new("orders-db").version("14").build();
        let upgrade = config.cluster_upgrade_config(&cluster);
        assert_eq!(upgrade.policy_mode, UpgradePolicyMode::Full);
        assert_eq!(upgrade.configured_version, "14");
        assert_eq!(upgrade.target_version, "17");
    }
}

mod error_tests {
    use std::time::Duration;

    use pg_upgrade_operator::client::MemberError;
    use pg_upgrade_operator::controller::error::Error;

    #[test]
    fn test_member_errors_are_transient() {
        let err: Error = MemberError::CommandFailed("boom".to_string()).into();
        assert!(err.is_retryable());
        assert_eq!(err.requeue_after(), Duration::from_secs(30));
    }

    #[test]
    fn test_validation_requeues_slowly() {
        let err = Error::Validation("numberOfInstances must be at least 1".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.requeue_after(), Duration::from_secs(300));
    }
}

mod health_tests {
    use pg_upgrade_operator::health::HealthState;

    #[tokio::test]
    async fn test_readiness_toggle() {
        let state = HealthState::new();
        assert!(!state.is_ready().await);
        state.set_ready(true).await;
        assert!(state.is_ready().await);
        state.set_ready(false).await;
        assert!(!state.is_ready().await);
    }

    #[test]
    fn test_metrics_exposed() {
        let state = HealthState::new();
        state.metrics.record_pass_outcome("PolicyOff");
        let encoded = state.metrics.encode();
        assert!(encoded.contains("pgoperator_upgrade_pass_outcomes"));
    }
}
