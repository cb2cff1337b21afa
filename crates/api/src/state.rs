use std::sync::Arc;

use pmdash_core::registry::SharedRegistry;
use pmdash_events::{EventBus, StatusNotifier};
use pmdash_worker::{KindRegistry, RunnerConfig, SubmissionGateway, TaskRunner};

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool, present when the registry is Postgres-backed.
    pub pool: Option<pmdash_db::DbPool>,
    /// Server configuration (JWT settings are read by the auth extractor).
    pub config: Arc<ServerConfig>,
    /// Authoritative task storage.
    pub registry: SharedRegistry,
    /// Per-task snapshot fan-out for polling and SSE.
    pub notifier: Arc<StatusNotifier>,
    /// Entry point for new tasks; also reaches the runner for cancellation.
    pub gateway: SubmissionGateway,
    /// WebSocket connection manager (browser clients).
    pub ws_manager: Arc<WsManager>,
    /// Centralized event bus for task lifecycle events.
    pub event_bus: Arc<EventBus>,
}

impl AppState {
    /// Wire the task services around `registry`.
    pub fn build(
        config: ServerConfig,
        registry: SharedRegistry,
        pool: Option<pmdash_db::DbPool>,
        kinds: KindRegistry,
        runner_config: RunnerConfig,
    ) -> Self {
        let notifier = Arc::new(StatusNotifier::new(registry.clone()));
        let event_bus = Arc::new(EventBus::default());
        let runner = TaskRunner::new(
            registry.clone(),
            Arc::clone(&notifier),
            Arc::clone(&event_bus),
            Arc::new(kinds),
            runner_config,
        );

        Self {
            pool,
            config: Arc::new(config),
            registry,
            notifier,
            gateway: SubmissionGateway::new(runner),
            ws_manager: Arc::new(WsManager::new()),
            event_bus,
        }
    }

    pub fn runner(&self) -> &TaskRunner {
        self.gateway.runner()
    }
}
