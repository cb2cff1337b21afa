#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use pmdash_api::auth::jwt::{generate_access_token, JwtConfig};
use pmdash_api::config::{RegistryBackend, ServerConfig};
use pmdash_api::router::build_app_router;
use pmdash_api::state::AppState;
use pmdash_core::registry::InMemoryTaskRegistry;
use pmdash_core::roles::{ROLE_ADMIN, ROLE_USER};
use pmdash_core::task::{Task, TaskId};
use pmdash_core::types::DbId;
use pmdash_worker::{
    AgentSimConfig, KindRegistry, KindSpec, ProgressSink, RunnerConfig, TaskKindInfo, WorkError,
    WorkFunction,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "integration-test-secret-that-is-long-enough";

/// Kind that advances in `n` evenly sized steps, 20 ms apart.
pub const KIND_STEPS: &str = "steps";
/// Kind that reports 10% and then waits for cancellation.
pub const KIND_HOLD: &str = "hold";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        ws_heartbeat_secs: 30,
        registry_backend: RegistryBackend::Memory,
        database_url: None,
        jwt: JwtConfig {
            secret: TEST_SECRET.to_string(),
            access_token_expiry_mins: 15,
        },
    }
}

pub fn runner_config() -> RunnerConfig {
    RunnerConfig {
        start_delay: Duration::from_millis(50),
        cancel_grace: Duration::from_millis(200),
        storage_retry_attempts: 2,
        storage_retry_backoff: Duration::from_millis(1),
        max_payload_bytes: 4096,
    }
}

// ---------------------------------------------------------------------------
// Test work functions
// ---------------------------------------------------------------------------

struct Steps;

#[async_trait]
impl WorkFunction for Steps {
    fn validate(&self, payload: &Value) -> Result<(), String> {
        match payload["n"].as_u64() {
            Some(n) if (1..=100).contains(&n) => Ok(()),
            _ => Err("'n' must be between 1 and 100".into()),
        }
    }

    async fn run(
        &self,
        payload: Value,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<Value, WorkError> {
        let n = payload["n"].as_u64().unwrap_or(1) as u8;
        for i in 1..=n {
            tokio::select! {
                _ = cancel.cancelled() => return Err(WorkError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
            let pct = (u16::from(i) * 100 / u16::from(n)) as u8;
            progress
                .report(pct)
                .await
                .map_err(|e| WorkError::Failed(e.to_string()))?;
        }
        Ok(json!({"steps": n}))
    }
}

struct Hold;

#[async_trait]
impl WorkFunction for Hold {
    async fn run(
        &self,
        _payload: Value,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<Value, WorkError> {
        progress
            .report(10)
            .await
            .map_err(|e| WorkError::Failed(e.to_string()))?;
        cancel.cancelled().await;
        Err(WorkError::Cancelled)
    }
}

fn info(id: &str) -> TaskKindInfo {
    TaskKindInfo {
        id: id.into(),
        name: id.into(),
        description: String::new(),
        icon: "box".into(),
        color: "gray".into(),
    }
}

/// The four agents with millisecond ticks, plus the test kinds.
pub fn test_kinds() -> KindRegistry {
    let mut kinds = KindRegistry::with_agents(AgentSimConfig {
        tick_min: Duration::from_millis(1),
        tick_max: Duration::from_millis(3),
    });
    kinds.register(KindSpec::new(info(KIND_STEPS), Arc::new(Steps)));
    kinds.register(KindSpec::new(info(KIND_HOLD), Arc::new(Hold)));
    kinds
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// The shared router over an in-memory registry, plus its state.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// Poll the registry until `pred` holds for the task, or panic after 5 s.
    pub async fn wait_for(&self, id: TaskId, pred: impl Fn(&Task) -> bool) -> Task {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let task = self.state.notifier.poll(id).await.unwrap();
            if pred(&task) {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {id} never reached the expected state, last seen {task:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Build the full application router exactly as `main.rs` does.
pub fn build_test_app() -> TestApp {
    let config = test_config();
    let state = AppState::build(
        config.clone(),
        Arc::new(InMemoryTaskRegistry::new()),
        None,
        test_kinds(),
        runner_config(),
    );
    let router = build_app_router(state.clone(), &config);
    TestApp { router, state }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

pub fn token_for(user_id: DbId, role: &str) -> String {
    let config = test_config();
    generate_access_token(user_id, role, &config.jwt).unwrap()
}

pub fn user_token(user_id: DbId) -> String {
    token_for(user_id, ROLE_USER)
}

pub fn admin_token(user_id: DbId) -> String {
    token_for(user_id, ROLE_ADMIN)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    send(app, Method::POST, uri, None, Some(body)).await
}

pub async fn post_json_auth(app: Router, uri: &str, body: Value, token: &str) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn post_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), None).await
}

pub async fn delete_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, Some(token), None).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Submit a task as `token`'s principal and return its id.
pub async fn submit(app: Router, kind: &str, payload: Value, token: &str) -> TaskId {
    let response = post_json_auth(
        app,
        "/api/v1/tasks",
        json!({"kind": kind, "payload": payload}),
        token,
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::ACCEPTED);
    let json = body_json(response).await;
    json["data"]["id"].as_str().unwrap().parse().unwrap()
}
