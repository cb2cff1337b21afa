pub mod task_kinds;
pub mod tasks;
