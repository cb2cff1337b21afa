//! Event-to-WebSocket routing.

use std::sync::Arc;

use axum::extract::ws::Message;
use pmdash_core::task_events::{MSG_TYPE_TASK_UPDATE, TASK_EVENT_PREFIX};
use pmdash_events::PlatformEvent;
use serde_json::json;
use tokio::sync::broadcast;

use crate::ws::WsManager;

/// Routes task events to their owner's connections and project room.
pub struct NotificationRouter {
    ws_manager: Arc<WsManager>,
}

impl NotificationRouter {
    pub fn new(ws_manager: Arc<WsManager>) -> Self {
        Self { ws_manager }
    }

    /// Run the main routing loop.
    ///
    /// The loop exits when the channel is closed (i.e. the
    /// [`EventBus`](pmdash_events::EventBus) is dropped).
    pub async fn run(self, mut receiver: broadcast::Receiver<PlatformEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    self.route_event(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Snapshots carry revisions; clients catch up on the next one.
                    tracing::warn!(skipped = n, "Notification router lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notification router shutting down");
                    break;
                }
            }
        }
    }

    /// Push a single event. Returns the number of connections reached.
    pub async fn route_event(&self, event: &PlatformEvent) -> usize {
        if !event.event_type.starts_with(TASK_EVENT_PREFIX) {
            return 0;
        }

        let message = task_update_message(event);
        let sent = self
            .ws_manager
            .send_to_task_audience(event.actor_user_id, event.project_id, message)
            .await;
        tracing::trace!(event_type = %event.event_type, sent, "Task update pushed");
        sent
    }
}

/// Wire form of a pushed task update.
pub fn task_update_message(event: &PlatformEvent) -> Message {
    let body = json!({
        "type": MSG_TYPE_TASK_UPDATE,
        "event": event.event_type,
        "task": event.payload,
    });
    Message::Text(body.to_string().into())
}
