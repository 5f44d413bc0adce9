//! Talk Controller
//!
//! Matchmaking and timed session service for the 5min Talk language exchange.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus metrics recorder
//! 4. Spawn the `MatchCoordinator` actor
//! 5. Serve the API, health probes and `/metrics` on one listener
//! 6. Wait for shutdown signal, then drain

#![warn(clippy::pedantic)]

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use talk_controller::actors::MatchCoordinatorHandle;
use talk_controller::config::Config;
use talk_controller::http::{build_routes, AppState};
use talk_controller::observability::{health_router, init_metrics_recorder, HealthState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // Initialize tracing
    let json_logs = config.observability.json_logs;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.observability.log_filter.clone().into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!(
        service_id = %config.service_id,
        bind_address = %config.bind_address,
        join_grace_period_secs = config.policy.join_grace_period.as_secs(),
        session_duration_secs = config.policy.session_duration.as_secs(),
        points_per_session = config.policy.points_per_session,
        initial_points = config.policy.initial_points,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let coordinator = MatchCoordinatorHandle::new(config.service_id.clone(), config.policy.clone());
    let health_state = Arc::new(HealthState::new(coordinator.clone()));

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = build_routes(Arc::new(AppState {
        coordinator: coordinator.clone(),
    }))
    .merge(health_router(Arc::clone(&health_state)))
    .merge(metrics_router);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind server");
        format!("Failed to bind server to {addr}: {e}")
    })?;

    let server_token = coordinator.child_token();
    let server_shutdown = server_token.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready();
    info!(addr = %addr, "Talk Controller running");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so the load balancer stops sending traffic
    health_state.set_not_ready();

    match coordinator.shutdown().await {
        Ok(aborted) => info!(aborted_sessions = aborted, "Open sessions aborted"),
        Err(e) => warn!(error = %e, "Coordinator shutdown error"),
    }

    server_token.cancel();
    if tokio::time::timeout(config.shutdown_grace, server).await.is_err() {
        warn!(
            grace_secs = config.shutdown_grace.as_secs(),
            "HTTP server did not drain in time"
        );
    }

    coordinator.cancel();
    info!("Talk Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
