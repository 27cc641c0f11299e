//! In-memory cluster for driving upgrade passes in functional tests.
//!
//! `MockCluster` stands in for the Kubernetes pod API, the Patroni REST API
//! and pod exec at once. Passes run through the real `run_upgrade_pass`,
//! probe and coordinator; only the member state is simulated.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jiff::Timestamp;
use pg_upgrade_operator::client::{
    CommandExecutor, MemberDirectory, MemberError, MemberRole, MemberState, MemberStateSource,
    PodIdentity, RunningState,
};
use pg_upgrade_operator::controller::cluster_probe::ClusterStateProbe;
use pg_upgrade_operator::controller::error::Error;
use pg_upgrade_operator::controller::upgrade_coordinator::UpgradeCoordinator;
use pg_upgrade_operator::controller::upgrade_guard::DEFAULT_RETRIGGER_COOLDOWN;
use pg_upgrade_operator::controller::upgrade_pass::{PassInput, PassReport, run_upgrade_pass};
use pg_upgrade_operator::controller::version_policy::ClusterUpgradeConfig;
use pg_upgrade_operator::crd::{UpgradePolicyMode, UpgradeTriggerRecord};

pub const NAMESPACE: &str = "databases";
pub const CLUSTER: &str = "orders-db";

/// Simulated member.
#[derive(Debug, Clone)]
pub struct MockMember {
    pub name: String,
    pub role: MemberRole,
    pub running: RunningState,
    pub server_version: Option<u32>,
    /// When false, state queries fail.
    pub reachable: bool,
}

#[derive(Debug, Default)]
struct Inner {
    members: Vec<MockMember>,
    exec_calls: Vec<(PodIdentity, Vec<String>)>,
    exec_fails: bool,
    list_fails: bool,
}

/// Simulated cluster shared between the directory, probe and executor roles.
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    inner: Arc<Mutex<Inner>>,
}

impl MockCluster {
    /// Healthy cluster of `members` pods, all on major version `major`.
    /// The first pod is the leader.
    pub fn healthy(members: usize, major: u32) -> Self {
        let cluster = Self::default();
        for i in 0..members {
            let role = if i == 0 {
                MemberRole::Leader
            } else {
                MemberRole::Replica
            };
            cluster.add_member(MockMember {
                name: format!("{}-{}", CLUSTER, i),
                role,
                running: RunningState::Running,
                server_version: Some(major * 10_000 + 4),
                reachable: true,
            });
        }
        cluster
    }

    pub fn add_member(&self, member: MockMember) {
        self.inner.lock().unwrap().members.push(member);
    }

    /// Apply `f` to the named member.
    pub fn update_member(&self, name: &str, f: impl FnOnce(&mut MockMember)) {
        let mut inner = self.inner.lock().unwrap();
        let member = inner
            .members
            .iter_mut()
            .find(|m| m.name == name)
            .expect("member exists");
        f(member);
    }

    /// Simulate the upgrade procedure completing on every member.
    pub fn complete_upgrade(&self, major: u32) {
        for member in &mut self.inner.lock().unwrap().members {
            member.server_version = Some(major * 10_000 + 1);
        }
    }

    pub fn set_exec_fails(&self, fails: bool) {
        self.inner.lock().unwrap().exec_fails = fails;
    }

    pub fn set_list_fails(&self, fails: bool) {
        self.inner.lock().unwrap().list_fails = fails;
    }

    /// Commands executed so far.
    pub fn exec_calls(&self) -> Vec<(PodIdentity, Vec<String>)> {
        self.inner.lock().unwrap().exec_calls.clone()
    }
}

impl MemberDirectory for MockCluster {
    async fn list_members(
        &self,
        namespace: &str,
        _cluster_name: &str,
    ) -> Result<Vec<PodIdentity>, MemberError> {
        let inner = self.inner.lock().unwrap();
        if inner.list_fails {
            return Err(MemberError::CommandFailed("pod list unavailable".to_string()));
        }
        Ok(inner
            .members
            .iter()
            .map(|m| PodIdentity::new(namespace, m.name.clone()).with_address("10.0.0.1"))
            .collect())
    }
}

impl MemberStateSource for MockCluster {
    async fn member_state(&self, member: &PodIdentity) -> Result<MemberState, MemberError> {
        let inner = self.inner.lock().unwrap();
        let found = inner
            .members
            .iter()
            .find(|m| m.name == member.name && m.reachable)
            .ok_or_else(|| MemberError::NoAddress(member.to_string()))?;
        Ok(MemberState {
            role: found.role,
            running: found.running,
            server_version: found.server_version,
        })
    }
}

impl CommandExecutor for MockCluster {
    async fn exec(&self, pod: &PodIdentity, command: Vec<String>) -> Result<String, MemberError> {
        let mut inner = self.inner.lock().unwrap();
        inner.exec_calls.push((pod.clone(), command));
        if inner.exec_fails {
            Err(MemberError::CommandFailed("exit code 1".to_string()))
        } else {
            Ok("upgrade scheduled".to_string())
        }
    }
}

/// Upgrade configuration for the mock cluster.
pub fn upgrade_config(configured: &str, mode: UpgradePolicyMode, target: &str) -> ClusterUpgradeConfig {
    ClusterUpgradeConfig {
        configured_version: configured.to_string(),
        policy_mode: mode,
        target_version: target.to_string(),
    }
}

/// Run one pass against `cluster` with the default coordinator.
pub async fn run_pass(
    cluster: &MockCluster,
    config: &ClusterUpgradeConfig,
    last_trigger: Option<&UpgradeTriggerRecord>,
    now: Timestamp,
) -> Result<PassReport, Error> {
    let probe = ClusterStateProbe::new(cluster.clone(), Duration::from_secs(1));
    run_upgrade_pass(
        cluster,
        &probe,
        cluster,
        &UpgradeCoordinator::default(),
        PassInput {
            namespace: NAMESPACE,
            cluster_name: CLUSTER,
            config,
            last_trigger,
            now,
            cooldown: DEFAULT_RETRIGGER_COOLDOWN,
        },
    )
    .await
}
