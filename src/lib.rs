//! pg-upgrade-operator library crate
//!
//! Drives in-place major version upgrades of Patroni-managed PostgreSQL
//! clusters described by `PostgresCluster` resources.

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod leader_election;

pub use config::{ConfigError, OperatorConfig};
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, PredicateConfig, WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::context::Context;
use controller::reconciler::{error_policy, reconcile};
use crd::PostgresCluster;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Reflector-backed stream of applied objects, with spec-only changes let
/// through by the generation predicate. Requeues drive the periodic passes.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation, PredicateConfig::default());
    (reader, stream)
}

/// Run the PostgresCluster controller.
///
/// Watches the namespace from `config.watch_namespace`, or the whole cluster
/// when unset. Fails only when the context cannot be built.
pub async fn run_controller(
    client: Client,
    config: Arc<OperatorConfig>,
    health_state: Option<Arc<HealthState>>,
) -> Result<(), client::MemberError> {
    let namespace = config.watch_namespace.clone();
    let scope_msg = namespace.as_deref().unwrap_or("cluster-wide");
    info!(
        scope = %scope_msg,
        mode = %config.upgrade_mode,
        target = %config.target_major_version,
        "Starting controller for PostgresCluster resources"
    );

    let ctx = Arc::new(Context::new(client.clone(), config, health_state.clone())?);

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let clusters: Api<PostgresCluster> = scoped_api(client, namespace.as_deref());
    let (reader, cluster_stream) = create_filtered_stream(clusters, default_watcher_config());

    Controller::for_stream(cluster_stream, reader)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    error!("Controller stream ended unexpectedly");
    Ok(())
}
