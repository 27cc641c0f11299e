//! Shared context for the controller.
//!
//! Holds the Kubernetes client, the event reporter, operator configuration
//! and the collaborators an upgrade pass runs with.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::client::{KubePods, MemberError, PatroniClient};
use crate::config::OperatorConfig;
use crate::controller::cluster_probe::ClusterStateProbe;
use crate::controller::upgrade_coordinator::UpgradeCoordinator;
use crate::controller::version_policy::VersionPolicy;
use crate::crd::PostgresCluster;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "pg-upgrade-operator";

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Operator-wide configuration
    pub config: Arc<OperatorConfig>,
    /// Upgrade decision and trigger
    pub coordinator: UpgradeCoordinator,
    /// Member listing and command execution
    pub pods: KubePods,
    /// Member state observation through Patroni
    pub probe: ClusterStateProbe<PatroniClient>,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        config: Arc<OperatorConfig>,
        health_state: Option<Arc<HealthState>>,
    ) -> Result<Self, MemberError> {
        let patroni = PatroniClient::new(config.patroni_port, config.member_query_timeout)?;
        let pods = KubePods::new(
            client.clone(),
            config.cluster_name_label.clone(),
            Some(config.postgres_container.clone()),
            config.upgrade_exec_timeout,
        );
        let coordinator =
            UpgradeCoordinator::new(VersionPolicy::default(), config.upgrade_script.clone());

        Ok(Self {
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
            probe: ClusterStateProbe::new(patroni, config.member_query_timeout),
            coordinator,
            pods,
            config,
            client,
        })
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn publish_event(
        &self,
        resource: &PostgresCluster,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let object_ref = resource.object_ref(&());
        if let Err(e) = self
            .recorder()
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a cluster
    pub async fn publish_normal_event(
        &self,
        resource: &PostgresCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish_event(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a cluster
    pub async fn publish_warning_event(
        &self,
        resource: &PostgresCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish_event(resource, EventType::Warning, reason, action, note)
            .await;
    }
}
