//! Attendance Service
//!
//! Rotating-code attendance server.
//!
//! # Servers
//!
//! - WebSocket server for presenters and attendees (default: 0.0.0.0:6969)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus metrics recorder
//! 4. Load the roster file
//! 5. Initialize actor system (`SessionRegistryHandle`)
//! 6. Start health HTTP server (liveness, readiness, metrics)
//! 7. Start WebSocket server
//! 8. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use attendance_service::actors::{ActorMetrics, SessionRegistryHandle};
use attendance_service::config::Config;
use attendance_service::http::{router, AppState};
use attendance_service::observability::{health_router, init_metrics_recorder, HealthState};
use attendance_service::roster::StaticRosterProvider;
use axum::Router;
use common::clock::{Clock, SystemClock};
use common::config::LogFormat;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Deadline for session actors to stop after a shutdown signal.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: it decides the log format
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_filter.clone().into());
    match config.observability.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        roster_path = %config.roster_path,
        rotation_period_ms = config.engine.rotation_period_ms(),
        scan_tolerance_ms = config.engine.scan_tolerance_ms,
        max_sessions = config.engine.max_sessions,
        "Starting Attendance Service"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let roster = StaticRosterProvider::from_json_file(&config.roster_path)
        .await
        .map_err(|e| {
            error!(error = %e, path = %config.roster_path, "Failed to load roster file");
            e
        })?;
    info!(classrooms = roster.classroom_count(), "Roster loaded");

    let actor_metrics = ActorMetrics::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = SessionRegistryHandle::new(
        Arc::new(roster),
        config.engine.clone(),
        Arc::clone(&actor_metrics),
        Arc::clone(&clock),
    );
    info!("Actor system initialized");

    // Servers stop with the registry
    let shutdown_token = registry.child_token();
    let health_state = Arc::new(HealthState::new(Arc::clone(&actor_metrics)));

    // Health server: liveness, readiness and Prometheus /metrics
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind before spawning to fail fast
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    // WebSocket server
    let ws_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let ws_app = router(AppState {
        registry: registry.clone(),
        settings: config.engine.clone(),
        metrics: Arc::clone(&actor_metrics),
        clock,
        allowed_origins: Arc::new(config.allowed_origins.clone()),
    });
    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind WebSocket server");
        format!("Failed to bind WebSocket server to {ws_addr}: {e}")
    })?;

    let ws_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_shutdown.cancelled().await;
            info!("WebSocket server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "WebSocket server failed");
        }
    });
    info!(addr = %ws_addr, "WebSocket server started");

    health_state.set_ready();
    info!("Attendance Service running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    // Readiness drops first so load balancers stop routing presenters here
    health_state.set_draining();

    // Cancels every session; presenter and attendee flows end with them
    if let Err(e) = registry.shutdown(SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Actor system shutdown error");
    }

    // Give servers time to finish in-flight responses
    tokio::time::sleep(Duration::from_secs(1)).await;

    info!("Attendance Service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; without them the service
/// cannot shut down gracefully.
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
