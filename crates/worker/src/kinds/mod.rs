//! Task kinds: the closed set of work the service knows how to run.
//!
//! Each kind pairs display metadata with a [`WorkFunction`]. The set is
//! fixed once the [`KindRegistry`] is built at startup.

pub mod agents;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::AgentSimConfig;
use crate::progress::ProgressSink;

/// How a work function can end without a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    /// Stopped in response to the cancellation token.
    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// A cooperative unit of work.
///
/// Implementations should check `cancel` between steps and return
/// [`WorkError::Cancelled`] once it fires. Progress is reported only through
/// `progress`.
#[async_trait]
pub trait WorkFunction: Send + Sync {
    /// Kind-specific payload check, run by the gateway before a task exists.
    fn validate(&self, _payload: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }

    async fn run(
        &self,
        payload: serde_json::Value,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, WorkError>;
}

/// Display metadata for a task kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskKindInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub color: String,
}

/// A registered kind.
pub struct KindSpec {
    pub info: TaskKindInfo,
    pub work: Arc<dyn WorkFunction>,
    /// Overrides the runner's default cancellation grace.
    pub cancel_grace: Option<Duration>,
}

impl KindSpec {
    pub fn new(info: TaskKindInfo, work: Arc<dyn WorkFunction>) -> Self {
        Self {
            info,
            work,
            cancel_grace: None,
        }
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = Some(grace);
        self
    }
}

/// Registered task kinds, in registration order.
#[derive(Default)]
pub struct KindRegistry {
    kinds: Vec<Arc<KindSpec>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the four simulated agents.
    pub fn with_agents(sim: AgentSimConfig) -> Self {
        let mut registry = Self::new();
        for spec in agents::agent_kinds(sim) {
            registry.register(spec);
        }
        registry
    }

    /// Add a kind. A later registration under the same id replaces the earlier one.
    pub fn register(&mut self, spec: KindSpec) {
        let spec = Arc::new(spec);
        match self.kinds.iter_mut().find(|k| k.info.id == spec.info.id) {
            Some(existing) => *existing = spec,
            None => self.kinds.push(spec),
        }
    }

    pub fn get(&self, kind: &str) -> Option<Arc<KindSpec>> {
        self.kinds.iter().find(|k| k.info.id == kind).cloned()
    }

    pub fn list(&self) -> Vec<TaskKindInfo> {
        self.kinds.iter().map(|k| k.info.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use pmdash_core::task_kinds::AGENT_KINDS;

    use super::*;

    struct Noop;

    #[async_trait]
    impl WorkFunction for Noop {
        async fn run(
            &self,
            _payload: serde_json::Value,
            _progress: ProgressSink,
            _cancel: CancellationToken,
        ) -> Result<serde_json::Value, WorkError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn info(id: &str, name: &str) -> TaskKindInfo {
        TaskKindInfo {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            icon: String::new(),
            color: String::new(),
        }
    }

    #[test]
    fn with_agents_registers_every_agent_in_order() {
        let registry = KindRegistry::with_agents(AgentSimConfig::default());
        let ids: Vec<String> = registry.list().into_iter().map(|k| k.id).collect();
        assert_eq!(ids, AGENT_KINDS);
    }

    #[test]
    fn unknown_kind_is_absent() {
        let registry = KindRegistry::with_agents(AgentSimConfig::default());
        assert!(registry.get("deploy-agent").is_none());
    }

    #[test]
    fn register_replaces_same_id() {
        let mut registry = KindRegistry::new();
        registry.register(KindSpec::new(info("echo", "First"), Arc::new(Noop)));
        registry.register(
            KindSpec::new(info("echo", "Second"), Arc::new(Noop))
                .with_cancel_grace(Duration::from_millis(10)),
        );

        assert_eq!(registry.list().len(), 1);
        let spec = registry.get("echo").unwrap();
        assert_eq!(spec.info.name, "Second");
        assert_eq!(spec.cancel_grace, Some(Duration::from_millis(10)));
    }
}
