//! Database row models.

pub mod task;
