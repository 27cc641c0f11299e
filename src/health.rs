//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels for reconciliation metrics (namespace + name)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for pass outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub outcome: String,
}

impl EncodeLabelSet for OutcomeLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for upgrade trigger metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TriggerLabels {
    pub result: String,
}

impl EncodeLabelSet for TriggerLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("result", self.result.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    /// Upgrade passes by outcome
    pub upgrade_pass_outcomes_total: Family<OutcomeLabels, Counter>,
    /// Upgrade commands sent, by result
    pub upgrade_triggers_total: Family<TriggerLabels, Counter>,
    /// Members listed per cluster
    pub cluster_members: Family<ReconcileLabels, Gauge>,
    /// Running members per cluster
    pub cluster_members_running: Family<ReconcileLabels, Gauge>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "pgoperator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "pgoperator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "pgoperator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let upgrade_pass_outcomes_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "pgoperator_upgrade_pass_outcomes",
            "Upgrade passes by outcome",
            upgrade_pass_outcomes_total.clone(),
        );

        let upgrade_triggers_total = Family::<TriggerLabels, Counter>::default();
        registry.register(
            "pgoperator_upgrade_triggers",
            "In-place upgrade commands sent, by result",
            upgrade_triggers_total.clone(),
        );

        let cluster_members = Family::<ReconcileLabels, Gauge>::default();
        registry.register(
            "pgoperator_cluster_members",
            "Number of members listed for each cluster",
            cluster_members.clone(),
        );

        let cluster_members_running = Family::<ReconcileLabels, Gauge>::default();
        registry.register(
            "pgoperator_cluster_members_running",
            "Number of running members for each cluster",
            cluster_members_running.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            upgrade_pass_outcomes_total,
            upgrade_triggers_total,
            cluster_members,
            cluster_members_running,
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    /// Record how an upgrade pass ended
    pub fn record_pass_outcome(&self, outcome: &str) {
        let labels = OutcomeLabels {
            outcome: outcome.to_string(),
        };
        self.upgrade_pass_outcomes_total.get_or_create(&labels).inc();
    }

    /// Record an upgrade command
    pub fn record_trigger(&self, succeeded: bool) {
        let labels = TriggerLabels {
            result: if succeeded { "success" } else { "failure" }.to_string(),
        };
        self.upgrade_triggers_total.get_or_create(&labels).inc();
    }

    /// Update cluster member metrics
    pub fn set_cluster_members(&self, namespace: &str, name: &str, members: i64, running: i64) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.cluster_members.get_or_create(&labels).set(members);
        self.cluster_members_running
            .get_or_create(&labels)
            .set(running);
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controller)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile timestamp (Unix epoch seconds)
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
/// This is a simple check - if we can respond, we're alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0:8080 and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 8080));
    info!(port = 8080, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
