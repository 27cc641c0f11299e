//! Leader election on a coordination.k8s.io/v1 Lease.
//!
//! Only one operator replica may issue upgrade commands, so the controller
//! starts after the lease is acquired. Updates carry the lease's
//! resourceVersion; a concurrent writer makes the update fail with 409 and
//! the attempt reports "not leader" instead of an error.

use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::Client;
use kube::api::{Api, PostParams};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lease name for the operator leader election
pub const LEADER_LEASE_NAME: &str = "pg-upgrade-operator-leader";

const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// What to do with the lease as found.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LeaseAction {
    /// We hold it; refresh the renew time.
    Renew,
    /// Expired or vacant; take it over.
    TakeOver,
    /// Held by `holder` and still valid.
    Wait { holder: String },
}

/// Whether the lease is past its duration at `now`.
fn is_lease_expired(lease: &Lease, now: Timestamp) -> bool {
    if let Some(spec) = &lease.spec
        && let (Some(renew_time), Some(duration)) = (&spec.renew_time, spec.lease_duration_seconds)
    {
        return now > renew_time.0 + SignedDuration::from_secs(i64::from(duration));
    }
    true
}

fn lease_action(lease: &Lease, identity: &str, now: Timestamp) -> LeaseAction {
    let holder = lease
        .spec
        .as_ref()
        .and_then(|s| s.holder_identity.as_deref())
        .filter(|h| !h.is_empty());

    match holder {
        Some(h) if h == identity => LeaseAction::Renew,
        Some(h) if !is_lease_expired(lease, now) => LeaseAction::Wait {
            holder: h.to_string(),
        },
        _ => LeaseAction::TakeOver,
    }
}

/// Lease-based leader elector.
pub struct LeaderElector {
    client: Client,
    namespace: String,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
}

impl LeaderElector {
    /// Create an elector for `identity` on the operator lease in `namespace`.
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            lease_name: LEADER_LEASE_NAME.to_string(),
            identity: identity.to_string(),
            lease_duration: LEASE_DURATION,
            renew_interval: RENEW_INTERVAL,
        }
    }

    /// Interval between renewals.
    pub fn renew_interval(&self) -> Duration {
        self.renew_interval
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn lease_duration_secs(&self) -> i32 {
        i32::try_from(self.lease_duration.as_secs()).unwrap_or(i32::MAX)
    }

    /// Block until the lease is acquired.
    pub async fn acquire(&self) {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            "Waiting to acquire leadership..."
        );
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Acquired leadership");
                    return;
                }
                Ok(false) => debug!(identity = %self.identity, "Another instance is leader, waiting..."),
                Err(e) => warn!(identity = %self.identity, error = %e, "Failed to acquire lease, retrying..."),
            }
            tokio::time::sleep(self.renew_interval).await;
        }
    }

    /// Try to acquire or renew the lease once.
    ///
    /// Returns `Ok(true)` while this instance holds the lease.
    pub async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api = self.api();
        let now = Timestamp::now();

        let lease = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => return self.create_lease(&api, now).await,
            Err(e) => return Err(e.into()),
        };

        match lease_action(&lease, &self.identity, now) {
            LeaseAction::Wait { holder } => {
                debug!(identity = %self.identity, holder = %holder, "Lease held by another instance");
                Ok(false)
            }
            LeaseAction::Renew => {
                let mut updated = lease;
                if let Some(spec) = updated.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                self.replace_lease(&api, updated).await
            }
            LeaseAction::TakeOver => {
                let transitions = lease
                    .spec
                    .as_ref()
                    .and_then(|s| s.lease_transitions)
                    .unwrap_or(0);
                let resource_version = lease
                    .metadata
                    .resource_version
                    .clone()
                    .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))?;
                let mut updated = self.lease_for(now, transitions.saturating_add(1));
                updated.metadata.resource_version = Some(resource_version);
                let acquired = self.replace_lease(&api, updated).await?;
                if acquired {
                    info!(identity = %self.identity, transitions = transitions.saturating_add(1), "Took over expired lease");
                }
                Ok(acquired)
            }
        }
    }

    /// Clear the holder so another replica can take over without waiting
    /// for expiry.
    pub async fn release(&self) -> Result<(), LeaderElectionError> {
        let api = self.api();
        let mut lease = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if lease_action(&lease, &self.identity, Timestamp::now()) != LeaseAction::Renew {
            debug!(identity = %self.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }

        if let Some(spec) = lease.spec.as_mut() {
            spec.holder_identity = None;
        }
        if self.replace_lease(&api, lease).await? {
            info!(identity = %self.identity, "Released leadership");
        }
        Ok(())
    }

    fn lease_for(&self, now: Timestamp, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration_secs()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    async fn create_lease(&self, api: &Api<Lease>, now: Timestamp) -> Result<bool, LeaderElectionError> {
        match api.create(&PostParams::default(), &self.lease_for(now, 0)).await {
            Ok(_) => {
                info!(identity = %self.identity, "Created leader lease");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease created concurrently, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_lease(&self, api: &Api<Lease>, lease: Lease) -> Result<bool, LeaderElectionError> {
        if lease.metadata.resource_version.is_none() {
            return Err(LeaderElectionError::MissingResourceVersion(self.lease_name.clone()));
        }
        match api.replace(&self.lease_name, &PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease changed concurrently");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
