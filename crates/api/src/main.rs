use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pmdash_core::registry::{InMemoryTaskRegistry, SharedRegistry, TaskRegistry};
use pmdash_worker::{AgentSimConfig, KindRegistry, RunnerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pmdash_api::config::{RegistryBackend, ServerConfig};
use pmdash_api::notifications::NotificationRouter;
use pmdash_api::router::build_app_router;
use pmdash_api::state::AppState;
use pmdash_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pmdash_api=debug,pmdash_worker=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let runner_config = RunnerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        registry = ?config.registry_backend,
        "Loaded server configuration",
    );

    // --- Task registry ---
    let (registry, pool) = match config.registry_backend {
        RegistryBackend::Memory => (Arc::new(InMemoryTaskRegistry::new()) as SharedRegistry, None),
        RegistryBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL must be set");

            let pool = pmdash_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            pmdash_db::health_check(&pool)
                .await
                .expect("Database health check failed");

            pmdash_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            (
                Arc::new(pmdash_db::PgTaskRegistry::new(pool.clone())) as SharedRegistry,
                Some(pool),
            )
        }
    };
    tracing::info!(backend = registry.backend(), "Task registry ready");

    // --- App state (notifier, event bus, runner, gateway) ---
    let kinds = KindRegistry::with_agents(AgentSimConfig::from_env());
    let state = AppState::build(config.clone(), registry, pool, kinds, runner_config);

    // --- Heartbeat ---
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&state.ws_manager),
        Duration::from_secs(config.ws_heartbeat_secs),
    );

    // Spawn notification router (pushes task events to WebSocket clients).
    let notification_router = NotificationRouter::new(Arc::clone(&state.ws_manager));
    let router_handle = tokio::spawn(notification_router.run(state.event_bus.subscribe()));

    let runner = state.runner().clone();
    let ws_manager = Arc::clone(&state.ws_manager);
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    // Executions are cancelled before serve starts draining; open task
    // streams would otherwise hold their connections until the task ends.
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    let shutdown = async move {
        shutdown_signal().await;

        if tokio::time::timeout(drain, runner.shutdown()).await.is_err() {
            tracing::warn!(timeout_secs = drain.as_secs(), "Task runner shutdown timed out");
        }
        tracing::info!("Task runner stopped");

        // Let queued task updates reach clients before the sockets close.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let ws_count = ws_manager.connection_count().await;
        tracing::info!(ws_count, "Closing remaining WebSocket connections");
        ws_manager.shutdown_all().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    router_handle.abort();
    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
