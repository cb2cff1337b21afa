//! Simulated project-management agents.
//!
//! Each agent advances its progress in random steps at random intervals and
//! finishes with a canned report for its kind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pmdash_core::task::MAX_PROGRESS;
use pmdash_core::task_kinds::{
    KIND_CONTEXT_AGENT, KIND_DOC_AGENT, KIND_INVESTIGATE_AGENT, KIND_PLAN_AGENT,
};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use super::{KindSpec, TaskKindInfo, WorkError, WorkFunction};
use crate::config::AgentSimConfig;
use crate::progress::ProgressSink;

/// Longest accepted `task` description, in characters.
pub const MAX_TASK_CHARS: u64 = 4000;

/// Largest single progress step.
const MAX_STEP: u8 = 20;

/// Payload accepted by every agent.
#[derive(Debug, Deserialize, Validate)]
pub struct AgentPayload {
    #[validate(length(min = 1, max = 4000))]
    pub task: String,
    #[serde(default)]
    pub context: Option<Value>,
}

impl AgentPayload {
    pub fn parse(payload: &Value) -> Result<Self, String> {
        let parsed: Self = serde_json::from_value(payload.clone())
            .map_err(|e| format!("payload must be an object with a string 'task': {e}"))?;
        parsed
            .validate()
            .map_err(|_| format!("'task' must be 1 to {MAX_TASK_CHARS} characters"))?;
        if parsed.task.trim().is_empty() {
            return Err("'task' must not be blank".into());
        }
        Ok(parsed)
    }
}

/// Build the four agent kinds in display order.
pub fn agent_kinds(sim: AgentSimConfig) -> Vec<KindSpec> {
    [
        (
            KIND_CONTEXT_AGENT,
            "Context Agent",
            "Maintains project state and extracts key information",
            "activity",
            "blue",
        ),
        (
            KIND_DOC_AGENT,
            "Documentation Agent",
            "Generates Slack updates and Confluence designs",
            "file-text",
            "green",
        ),
        (
            KIND_PLAN_AGENT,
            "Planning Agent",
            "Breaks down tasks and estimates effort",
            "users",
            "purple",
        ),
        (
            KIND_INVESTIGATE_AGENT,
            "Investigation Agent",
            "Analyzes issues and creates troubleshooting reports",
            "zap",
            "orange",
        ),
    ]
    .into_iter()
    .map(|(id, name, description, icon, color)| {
        let info = TaskKindInfo {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            icon: icon.into(),
            color: color.into(),
        };
        KindSpec::new(
            info,
            Arc::new(SimulatedAgent {
                kind: id,
                sim: sim.clone(),
            }),
        )
    })
    .collect()
}

pub struct SimulatedAgent {
    kind: &'static str,
    sim: AgentSimConfig,
}

impl SimulatedAgent {
    fn next_tick(&self) -> (u8, Duration) {
        let mut rng = rand::rng();
        let min = self.sim.tick_min.as_millis() as u64;
        let max = (self.sim.tick_max.as_millis() as u64).max(min);
        (
            rng.random_range(1..=MAX_STEP),
            Duration::from_millis(rng.random_range(min..=max)),
        )
    }
}

#[async_trait]
impl WorkFunction for SimulatedAgent {
    fn validate(&self, payload: &Value) -> Result<(), String> {
        AgentPayload::parse(payload).map(|_| ())
    }

    async fn run(
        &self,
        payload: Value,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<Value, WorkError> {
        let request = AgentPayload::parse(&payload).map_err(WorkError::Failed)?;
        let mut current: u8 = 0;

        while current < MAX_PROGRESS {
            let (step, delay) = self.next_tick();
            tokio::select! {
                _ = cancel.cancelled() => return Err(WorkError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            current = current.saturating_add(step).min(MAX_PROGRESS);
            progress
                .report(current)
                .await
                .map_err(|e| WorkError::Failed(e.to_string()))?;
            tracing::debug!(task_id = %progress.task_id(), kind = self.kind, progress = current, "Agent progress");
        }

        Ok(canned_result(self.kind, &request.task))
    }
}

/// Report an agent hands back on completion.
pub fn canned_result(kind: &str, task: &str) -> Value {
    let (kind_type, data) = match kind {
        KIND_CONTEXT_AGENT => (
            "context_update",
            json!({
                "keyDecisions": ["Implemented user authentication", "Added real-time updates"],
                "blockers": ["Database migration pending"],
                "nextActions": ["Deploy to staging", "Run integration tests"],
            }),
        ),
        KIND_DOC_AGENT => (
            "documentation",
            json!({
                "slackUpdate": "Completed PM dashboard MVP\nAdded agent orchestration\nNext: User testing",
                "confluenceDoc": "# PM Dashboard Implementation\n\n## Overview\nBuilt lightweight agent ecosystem...",
            }),
        ),
        KIND_PLAN_AGENT => (
            "task_breakdown",
            json!({
                "tasks": [
                    {"name": "Setup authentication", "effort": "2d", "priority": "high"},
                    {"name": "Implement agent API", "effort": "3d", "priority": "medium"},
                    {"name": "Add real-time updates", "effort": "1d", "priority": "low"},
                ],
                "timeline": "1 week",
                "dependencies": ["Database setup", "API design"],
            }),
        ),
        KIND_INVESTIGATE_AGENT => (
            "investigation_report",
            json!({
                "rootCause": "Missing CORS configuration in production",
                "evidence": ["Browser console errors", "Network request failures"],
                "recommendations": ["Update server CORS settings", "Add environment-specific configs"],
            }),
        ),
        _ => ("generic", json!({"message": "Task completed successfully"})),
    };

    json!({"type": kind_type, "task": task, "data": data})
}
