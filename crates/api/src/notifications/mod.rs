//! Task update routing.
//!
//! The [`NotificationRouter`] subscribes to the event bus and pushes task
//! lifecycle events to the WebSocket connections that should see them.

pub mod router;

pub use router::NotificationRouter;
