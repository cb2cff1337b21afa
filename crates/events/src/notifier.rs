//! Per-task snapshot fan-out.
//!
//! [`StatusNotifier`] keeps one `tokio::sync::watch` channel per task that
//! currently has observers. The channel only ever moves to a snapshot with a
//! higher `revision`, so observers see a monotonic sequence. Slow observers
//! may skip intermediate snapshots, but the terminal snapshot is always the
//! final value of its channel.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use pmdash_core::registry::SharedRegistry;
use pmdash_core::task::{Task, TaskError, TaskId};
use tokio::sync::watch;

/// Stream of snapshots for one task, ending after the terminal snapshot.
pub type SnapshotStream = BoxStream<'static, Task>;

pub struct StatusNotifier {
    registry: SharedRegistry,
    channels: DashMap<TaskId, watch::Sender<Task>>,
}

impl StatusNotifier {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            channels: DashMap::new(),
        }
    }

    /// Latest committed snapshot, read straight from the registry.
    pub async fn poll(&self, id: TaskId) -> Result<Task, TaskError> {
        self.registry.get(id).await
    }

    /// Follow a task from its current snapshot to its terminal one.
    ///
    /// The first item is always the snapshot current at subscription time,
    /// so re-subscribing replays it. A task that is already terminal yields
    /// exactly one item.
    pub async fn subscribe(&self, id: TaskId) -> Result<SnapshotStream, TaskError> {
        let current = self.registry.get(id).await?;
        if current.is_terminal() {
            return Ok(stream::once(async move { current }).boxed());
        }

        let mut rx = self
            .channels
            .entry(id)
            .or_insert_with(|| watch::channel(current.clone()).0)
            .subscribe();
        self.publish(&current);

        // Commits that landed before the channel existed were never
        // published to it; pick them up from the registry.
        let latest = self.registry.get(id).await?;
        self.publish(&latest);

        rx.mark_changed();
        Ok(follow(rx))
    }

    /// Offer a freshly committed snapshot to the task's observers.
    ///
    /// Ignored unless someone is subscribed and the snapshot is newer than
    /// what they have already been offered.
    pub fn publish(&self, snapshot: &Task) {
        let Entry::Occupied(entry) = self.channels.entry(snapshot.id) else {
            return;
        };

        entry.get().send_if_modified(|current| {
            if snapshot.revision > current.revision {
                *current = snapshot.clone();
                true
            } else {
                false
            }
        });

        // Receivers keep the last value after the sender is dropped.
        if snapshot.is_terminal() || entry.get().receiver_count() == 0 {
            entry.remove();
        }
    }

    /// Drop the task's channel, ending any open streams.
    pub fn forget(&self, id: TaskId) {
        if self.channels.remove(&id).is_some() {
            tracing::debug!(task_id = %id, "Dropped snapshot channel");
        }
    }

    /// Drop every channel, ending all open streams. Returns how many were
    /// dropped.
    pub fn close_all(&self) -> usize {
        let count = self.channels.len();
        self.channels.clear();
        count
    }

    /// Number of tasks with a live channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

fn follow(rx: watch::Receiver<Task>) -> SnapshotStream {
    stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        rx.changed().await.ok()?;
        let snapshot = rx.borrow_and_update().clone();
        let next = if snapshot.is_terminal() {
            None
        } else {
            Some(rx)
        };
        Some((snapshot, next))
    })
    .boxed()
}
