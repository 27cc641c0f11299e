//! End-to-end upgrade pass scenarios.

use jiff::{SignedDuration, Timestamp};
use pg_upgrade_operator::client::{MemberRole, RunningState};
use pg_upgrade_operator::controller::upgrade_coordinator::SkipReason;
use pg_upgrade_operator::controller::upgrade_pass::PassOutcome;
use pg_upgrade_operator::controller::error::Error;
use pg_upgrade_operator::crd::UpgradePolicyMode;

use crate::fixtures::trigger_record;
use crate::mock_state::{CLUSTER, MockCluster, MockMember, run_pass, upgrade_config};

// ============================================================================
// Triggering
// ============================================================================

/// Full mode, healthy 3-member cluster on 12, target 13: exactly one exec on
/// the leader with member count 3.
#[tokio::test]
async fn test_full_mode_upgrades_behind_leader() {
    let cluster = MockCluster::healthy(3, 12);
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");

    let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::Triggered);
    assert_eq!(report.decision.desired().label(), "13");
    assert_eq!(report.decision.desired().overridden_from(), Some("12"));

    let calls = cluster.exec_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0.name, format!("{}-0", CLUSTER));
    assert_eq!(
        calls[0].1,
        vec!["python3", "/scripts/inplace_upgrade.py", "3"]
    );

    let record = report.trigger_record.unwrap();
    assert!(record.succeeded);
    assert_eq!(record.target_version, "13");
    assert_eq!(record.member_count, 3);
}

/// Manual mode compares against the configured version only.
#[tokio::test]
async fn test_manual_mode_upgrades_towards_configured_version() {
    let cluster = MockCluster::healthy(3, 11);
    let config = upgrade_config("12", UpgradePolicyMode::Manual, "13");

    let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::Triggered);
    assert_eq!(report.decision.desired().label(), "12");
    assert_eq!(cluster.exec_calls().len(), 1);
}

// ============================================================================
// Skipping
// ============================================================================

/// Off mode never triggers, even with the leader behind the configured version.
#[tokio::test]
async fn test_off_mode_never_triggers() {
    let cluster = MockCluster::healthy(3, 11);
    let config = upgrade_config("12", UpgradePolicyMode::Off, "13");

    let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::PolicyOff);
    assert_eq!(report.decision.desired().label(), "12");
    assert!(cluster.exec_calls().is_empty());
}

/// One replica not running blocks the upgrade.
#[tokio::test]
async fn test_member_not_running_blocks_upgrade() {
    let cluster = MockCluster::healthy(3, 12);
    cluster.update_member(&format!("{}-2", CLUSTER), |m| {
        m.running = RunningState::NotRunning;
    });
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");

    let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::NotConverged);
    assert!(!report.snapshot.all_members_running);
    assert!(cluster.exec_calls().is_empty());
}

/// An unreachable member counts as not running.
#[tokio::test]
async fn test_unreachable_member_blocks_upgrade() {
    let cluster = MockCluster::healthy(2, 12);
    cluster.update_member(&format!("{}-1", CLUSTER), |m| m.reachable = false);
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");

    let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::NotConverged);
    assert!(cluster.exec_calls().is_empty());
}

/// Two leaders is split-brain: no trigger.
#[tokio::test]
async fn test_split_brain_blocks_upgrade() {
    let cluster = MockCluster::healthy(3, 12);
    cluster.update_member(&format!("{}-1", CLUSTER), |m| m.role = MemberRole::Leader);
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");

    let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::SplitBrain);
    assert_eq!(report.snapshot.leader_count, 2);
    assert!(cluster.exec_calls().is_empty());
}

/// No leader: no trigger.
#[tokio::test]
async fn test_missing_leader_blocks_upgrade() {
    let cluster = MockCluster::healthy(2, 12);
    cluster.update_member(&format!("{}-0", CLUSTER), |m| m.role = MemberRole::Replica);
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");

    let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::NoLeader);
    assert!(cluster.exec_calls().is_empty());
}

/// Unknown desired version fails closed.
#[tokio::test]
async fn test_unknown_version_fails_closed() {
    let cluster = MockCluster::healthy(2, 12);
    let config = upgrade_config("12.x", UpgradePolicyMode::Manual, "13");

    let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::UnknownDesiredVersion);
    assert_eq!(
        report.decision.skip_reason(),
        Some(&SkipReason::UnknownDesiredVersion("12.x".to_string()))
    );
    assert!(cluster.exec_calls().is_empty());
}

/// Leader without a reported server version fails closed.
#[tokio::test]
async fn test_leader_without_version_fails_closed() {
    let cluster = MockCluster::default();
    cluster.add_member(MockMember {
        name: format!("{}-0", CLUSTER),
        role: MemberRole::Leader,
        running: RunningState::Running,
        server_version: None,
        reachable: true,
    });
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");

    let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::UnknownLeaderVersion);
    assert!(cluster.exec_calls().is_empty());
}

/// A leader reporting an implausible server version fails closed.
#[tokio::test]
async fn test_leader_with_implausible_version_fails_closed() {
    let cluster = MockCluster::healthy(3, 12);
    cluster.update_member(&format!("{}-0", CLUSTER), |m| m.server_version = Some(5));
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");

    let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::UnknownLeaderVersion);
    assert!(cluster.exec_calls().is_empty());
}

/// An empty member list is not converged.
#[tokio::test]
async fn test_empty_cluster_does_nothing() {
    let cluster = MockCluster::default();
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");

    let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::NoLeader);
    assert_eq!(report.snapshot.member_count, 0);
    assert!(cluster.exec_calls().is_empty());
}

// ============================================================================
// Multi-pass sequences
// ============================================================================

/// Trigger, wait through the cooldown while the upgrade runs, then settle.
#[tokio::test]
async fn test_upgrade_lifecycle() {
    let cluster = MockCluster::healthy(3, 12);
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");
    let start = Timestamp::now();

    let first = run_pass(&cluster, &config, None, start).await.unwrap();
    assert_eq!(first.outcome, PassOutcome::Triggered);
    let record = first.trigger_record.unwrap();

    // Upgrade in progress: the leader still reports 12
    let second = run_pass(
        &cluster,
        &config,
        Some(&record),
        start + SignedDuration::from_secs(60),
    )
    .await
    .unwrap();
    assert_eq!(second.outcome, PassOutcome::TriggerInFlight);
    assert_eq!(cluster.exec_calls().len(), 1);

    cluster.complete_upgrade(13);
    let third = run_pass(
        &cluster,
        &config,
        Some(&record),
        start + SignedDuration::from_secs(120),
    )
    .await
    .unwrap();
    assert_eq!(third.outcome, PassOutcome::AlreadyCurrent);
    assert_eq!(cluster.exec_calls().len(), 1);
}

/// A stuck upgrade is retried once the cooldown has passed.
#[tokio::test]
async fn test_retrigger_after_cooldown() {
    let cluster = MockCluster::healthy(3, 12);
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");
    let now = Timestamp::now();
    let stale = trigger_record("13", now - SignedDuration::from_secs(3600));

    let report = run_pass(&cluster, &config, Some(&stale), now).await.unwrap();

    assert_eq!(report.outcome, PassOutcome::Triggered);
    assert_eq!(cluster.exec_calls().len(), 1);
}

/// A failed exec is reported, recorded, and does not block the next pass.
#[tokio::test]
async fn test_failed_trigger_is_retried() {
    let cluster = MockCluster::healthy(3, 12);
    cluster.set_exec_fails(true);
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");
    let now = Timestamp::now();

    let failed = run_pass(&cluster, &config, None, now).await.unwrap();
    assert_eq!(failed.outcome, PassOutcome::TriggerFailed);
    assert!(matches!(failed.trigger_error, Some(Error::Execution { .. })));
    let record = failed.trigger_record.unwrap();
    assert!(!record.succeeded);
    assert!(record.message.unwrap().contains("exit code 1"));

    cluster.set_exec_fails(false);
    let mut failed_record = trigger_record("13", now);
    failed_record.succeeded = false;
    let retried = run_pass(
        &cluster,
        &config,
        Some(&failed_record),
        now + SignedDuration::from_secs(30),
    )
    .await
    .unwrap();
    assert_eq!(retried.outcome, PassOutcome::Triggered);
    assert_eq!(cluster.exec_calls().len(), 2);
}

/// Repeated passes over an unchanged current cluster never exec.
#[tokio::test]
async fn test_steady_cluster_is_idempotent() {
    let cluster = MockCluster::healthy(3, 13);
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");

    for _ in 0..5 {
        let report = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap();
        assert_eq!(report.outcome, PassOutcome::AlreadyCurrent);
    }
    assert!(cluster.exec_calls().is_empty());
}

/// A failed member listing fails the pass.
#[tokio::test]
async fn test_listing_failure_fails_pass() {
    let cluster = MockCluster::healthy(3, 12);
    cluster.set_list_fails(true);
    let config = upgrade_config("12", UpgradePolicyMode::Full, "13");

    let err = run_pass(&cluster, &config, None, Timestamp::now()).await.unwrap_err();

    assert!(err.is_retryable());
    assert!(cluster.exec_calls().is_empty());
}
