//! Domain model for the pmdash task service.
//!
//! This crate has zero internal dependencies so the database, worker, and
//! API crates can all share the same task model, state machine, and
//! registry contract.

pub mod registry;
pub mod roles;
pub mod task;
pub mod task_events;
pub mod task_kinds;
pub mod types;
