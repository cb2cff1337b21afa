//! Well-known task kind names.
//!
//! These are the simulated agents registered by the worker at startup. The
//! closed set of accepted kinds is whatever the worker's kind registry holds,
//! so deployments can add kinds without touching `core`.

/// Maintains project state and extracts key information.
pub const KIND_CONTEXT_AGENT: &str = "context-agent";

/// Generates Slack updates and Confluence designs.
pub const KIND_DOC_AGENT: &str = "doc-agent";

/// Breaks down tasks and estimates effort.
pub const KIND_PLAN_AGENT: &str = "plan-agent";

/// Analyzes issues and creates troubleshooting reports.
pub const KIND_INVESTIGATE_AGENT: &str = "investigate-agent";

/// All built-in agent kinds, in display order.
pub const AGENT_KINDS: [&str; 4] = [
    KIND_CONTEXT_AGENT,
    KIND_DOC_AGENT,
    KIND_PLAN_AGENT,
    KIND_INVESTIGATE_AGENT,
];
