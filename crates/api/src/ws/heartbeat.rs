use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::ws::manager::WsManager;

/// Spawn a background task that pings every connected client each `period`
/// and drops connections that can no longer be reached.
///
/// Runs until aborted through the returned handle.
pub fn start_heartbeat(ws_manager: Arc<WsManager>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticks.tick().await;
            let dropped = ws_manager.ping_all().await;
            let count = ws_manager.connection_count().await;
            if dropped > 0 {
                tracing::info!(dropped, count, "Dropped unreachable WebSocket connections");
            } else {
                tracing::debug!(count, "WebSocket heartbeat ping");
            }
        }
    })
}
