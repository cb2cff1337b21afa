//! Task execution for the pmdash service.
//!
//! - [`kinds`]: the closed set of task kinds and their work functions.
//! - [`runner`]: drives tasks from Pending to a terminal state.
//! - [`gateway`]: validates submissions and hands them to the runner.

pub mod config;
pub mod gateway;
pub mod kinds;
pub mod progress;
pub mod runner;

pub use config::{AgentSimConfig, RunnerConfig};
pub use gateway::{NewTask, SubmissionGateway};
pub use kinds::{KindRegistry, KindSpec, TaskKindInfo, WorkError, WorkFunction};
pub use progress::ProgressSink;
pub use runner::TaskRunner;
