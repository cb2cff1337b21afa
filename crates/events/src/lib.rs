//! Event fan-out for the task service.
//!
//! - [`bus`]: platform-wide broadcast of [`PlatformEvent`]s.
//! - [`notifier`]: per-task snapshot streams for pollers and subscribers.

pub mod bus;
pub mod notifier;

pub use bus::{EventBus, PlatformEvent};
pub use notifier::{SnapshotStream, StatusNotifier};
