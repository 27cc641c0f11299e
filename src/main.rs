//! pg-upgrade-operator - drives in-place PostgreSQL major version upgrades.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads operator configuration from the environment
//! - Runs leader election (required for HA deployments)
//! - Starts the controller and health server

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info, warn};

use pg_upgrade_operator::OperatorConfig;
use pg_upgrade_operator::health::{HealthState, run_health_server};
use pg_upgrade_operator::leader_election::LeaderElector;
use pg_upgrade_operator::run_controller;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pg_upgrade_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting pg-upgrade-operator");

    let config = Arc::new(OperatorConfig::from_env()?);
    info!(
        mode = %config.upgrade_mode,
        target = %config.target_major_version,
        cluster_label = %config.cluster_name_label,
        watch_namespace = ?config.watch_namespace,
        "Loaded operator configuration"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Pod identity for leader election
    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'default'");
        "default".to_string()
    });

    let health_state = Arc::new(HealthState::new());

    // Probes answer even while waiting for leadership
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let elector = Arc::new(LeaderElector::new(client.clone(), &namespace, &pod_name));
    elector.acquire().await;

    let lease_renewal_handle = {
        let elector = elector.clone();
        #[allow(clippy::exit)]
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(elector.renew_interval()).await;
                match elector.try_acquire_or_renew().await {
                    Ok(true) => {}
                    Ok(false) => {
                        error!("Lost leadership! Shutting down...");
                        // Exit so Kubernetes restarts us and we re-enter election
                        std::process::exit(1);
                    }
                    Err(e) => {
                        error!("Failed to renew lease: {}. Shutting down...", e);
                        std::process::exit(1);
                    }
                }
            }
        })
    };

    let controller_handle = {
        let health_state = health_state.clone();
        let controller_client = client.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = run_controller(controller_client, config, Some(health_state)).await {
                error!("Controller failed to start: {}", e);
            }
        })
    };

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Renewal only ends via process::exit() or panic
        Err(e) = lease_renewal_handle => {
            error!("Lease renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            health_state.set_ready(false).await;
            info!("Marked operator as not ready");

            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            if let Err(e) = elector.release().await {
                warn!("Failed to release leader lease: {}", e);
            }
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
