//! Reconciliation loop for PostgresCluster.
//!
//! Each reconcile runs one upgrade pass: observe the members, decide whether
//! the leader needs an in-place major version upgrade, trigger it at most
//! once, and record the result in the status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::Error;
use crate::controller::status::{ConditionBuilder, get_condition_reason};
use crate::controller::upgrade_pass::{PassInput, PassOutcome, PassReport, run_upgrade_pass};
use crate::crd::{ConditionType, PostgresCluster, PostgresClusterStatus};

/// Requeue interval while the cluster is not converged
const REQUEUE_NOT_CONVERGED: Duration = Duration::from_secs(30);
/// Requeue interval for converged clusters
const REQUEUE_STEADY: Duration = Duration::from_secs(60);

/// Reconcile a PostgresCluster
pub async fn reconcile(obj: Arc<PostgresCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling PostgresCluster");

    // Nothing to clean up, the operator owns no child resources
    if obj.metadata.deletion_timestamp.is_some() {
        debug!(name = %name, "PostgresCluster is being deleted");
        return Ok(Action::await_change());
    }

    let api: Api<PostgresCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    if let Err(e) = validate_spec(&obj) {
        error!(name = %name, error = %e, "Validation failed");
        ctx.publish_warning_event(&obj, "ValidationFailed", "Validating", Some(e.to_string()))
            .await;
        return Err(e);
    }

    let upgrade_config = ctx.config.cluster_upgrade_config(&obj);
    let previous = obj.status.clone().unwrap_or_default();

    let report = run_upgrade_pass(
        &ctx.pods,
        &ctx.probe,
        &ctx.pods,
        &ctx.coordinator,
        PassInput {
            namespace: &namespace,
            cluster_name: &name,
            config: &upgrade_config,
            last_trigger: previous.last_upgrade_trigger.as_ref(),
            now: jiff::Timestamp::now(),
            cooldown: ctx.config.retrigger_cooldown,
        },
    )
    .await?;

    info!(
        name = %name,
        outcome = %report.outcome,
        desired = %report.decision.desired().label(),
        summary = %report.snapshot.summary(),
        "Upgrade pass complete"
    );

    publish_pass_events(&obj, &ctx, &previous, &report).await;
    update_status(&api, &obj, &previous, &report).await?;

    if let Some(ref health_state) = ctx.health_state {
        let metrics = &health_state.metrics;
        metrics.record_reconcile(&namespace, &name, start_time.elapsed().as_secs_f64());
        metrics.record_pass_outcome(report.outcome.as_str());
        if report.outcome.triggered() {
            metrics.record_trigger(report.outcome == PassOutcome::Triggered);
        }
        metrics.set_cluster_members(
            &namespace,
            &name,
            i64::try_from(report.snapshot.member_count).unwrap_or(i64::MAX),
            i64::try_from(report.snapshot.running_count()).unwrap_or(i64::MAX),
        );
    }

    if let Some(e) = report.trigger_error {
        return Err(e);
    }

    let requeue = if report.snapshot.is_converged() {
        REQUEUE_STEADY
    } else {
        REQUEUE_NOT_CONVERGED
    };
    Ok(Action::requeue(requeue))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<PostgresCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Validate the resource spec
pub fn validate_spec(obj: &PostgresCluster) -> Result<(), Error> {
    if obj.spec.postgres_version.trim().is_empty() {
        return Err(Error::Validation("postgresVersion must be set".to_string()));
    }
    if obj.spec.number_of_instances < 1 {
        return Err(Error::Validation(
            "numberOfInstances must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Severity of an event derived from a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// Event to publish on the PostgresCluster after a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassEvent {
    pub severity: EventSeverity,
    pub reason: &'static str,
    pub action: &'static str,
    pub note: Option<String>,
}

impl PassEvent {
    fn normal(reason: &'static str, action: &'static str, note: Option<String>) -> Self {
        Self {
            severity: EventSeverity::Normal,
            reason,
            action,
            note,
        }
    }

    fn warning(reason: &'static str, action: &'static str, note: Option<String>) -> Self {
        Self {
            severity: EventSeverity::Warning,
            reason,
            action,
            note,
        }
    }
}

/// Events for notable pass results.
///
/// Override, split-brain and unknown-version notices are only emitted when
/// they change against `previous`, so a steady cluster does not produce an
/// event every requeue.
pub fn pass_events(previous: &PostgresClusterStatus, report: &PassReport) -> Vec<PassEvent> {
    let mut events = Vec::new();
    let desired = report.decision.desired();

    if let Some(configured) = desired.overridden_from()
        && previous.desired_major_version.as_deref() != Some(desired.label())
    {
        events.push(PassEvent::normal(
            "MajorVersionOverride",
            "SelectingVersion",
            Some(format!(
                "Overriding configured major version {} with {}",
                configured,
                desired.label()
            )),
        ));
    }

    match report.outcome {
        PassOutcome::SplitBrain
            if get_condition_reason(&previous.conditions, ConditionType::Converged)
                != Some("MultipleLeaders") =>
        {
            events.push(PassEvent::warning(
                "MultipleLeaders",
                "ObservingCluster",
                Some(format!(
                    "{} members report the leader role, not upgrading",
                    report.snapshot.leader_count
                )),
            ));
        }
        PassOutcome::UnknownDesiredVersion
            if get_condition_reason(&previous.conditions, ConditionType::MajorVersionCurrent)
                != Some(PassOutcome::UnknownDesiredVersion.as_str()) =>
        {
            events.push(PassEvent::warning(
                "UnknownMajorVersion",
                "SelectingVersion",
                Some(format!("Major version {} is not known", desired.label())),
            ));
        }
        PassOutcome::Triggered => {
            if let Some(record) = &report.trigger_record {
                events.push(PassEvent::normal(
                    "UpgradeTriggered",
                    "Upgrading",
                    Some(format!(
                        "Started in-place upgrade to {} on {} ({} members)",
                        record.target_version, record.leader, record.member_count
                    )),
                ));
            }
        }
        PassOutcome::TriggerFailed => {
            events.push(PassEvent::warning(
                "UpgradeTriggerFailed",
                "Upgrading",
                report.trigger_error.as_ref().map(|e| e.to_string()),
            ));
        }
        _ => {}
    }

    events
}

/// Log the version override and publish the events of a pass.
async fn publish_pass_events(
    obj: &PostgresCluster,
    ctx: &Context,
    previous: &PostgresClusterStatus,
    report: &PassReport,
) {
    let desired = report.decision.desired();
    if let Some(configured) = desired.overridden_from() {
        info!(
            name = %obj.name_any(),
            configured,
            desired = desired.label(),
            "Overriding configured major version"
        );
    }

    for event in pass_events(previous, report) {
        match event.severity {
            EventSeverity::Normal => {
                ctx.publish_normal_event(obj, event.reason, event.action, event.note)
                    .await
            }
            EventSeverity::Warning => {
                ctx.publish_warning_event(obj, event.reason, event.action, event.note)
                    .await
            }
        }
    }
}

/// Build the status written after a pass.
pub fn build_status(
    previous: &PostgresClusterStatus,
    report: &PassReport,
    generation: Option<i64>,
) -> PostgresClusterStatus {
    let mut conditions = ConditionBuilder::from_existing(&previous.conditions);
    conditions.apply_pass(report, generation);

    let leader = report.snapshot.leader.as_ref();
    PostgresClusterStatus {
        current_major_version: leader
            .and_then(|l| l.server_version)
            .map(i64::from)
            .or(previous.current_major_version),
        desired_major_version: Some(report.decision.desired().label().to_string()),
        member_count: i32::try_from(report.snapshot.member_count).unwrap_or(i32::MAX),
        leader: leader.map(|l| l.identity.name.clone()),
        last_upgrade_trigger: report
            .trigger_record
            .clone()
            .or_else(|| previous.last_upgrade_trigger.clone()),
        observed_generation: generation,
        conditions: conditions.build(),
    }
}

/// Update the status of a PostgresCluster
async fn update_status(
    api: &Api<PostgresCluster>,
    obj: &PostgresCluster,
    previous: &PostgresClusterStatus,
    report: &PassReport,
) -> Result<(), Error> {
    let status = build_status(previous, report, obj.metadata.generation);
    let patch = serde_json::json!({
        "status": status
    });

    api.patch_status(
        &obj.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;

    Ok(())
}
