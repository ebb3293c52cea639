//! Asynchronous side effects of webhook events.
//!
//! Handlers never write snapshots inline. They dispatch a [`Task`] to a
//! [`TaskQueue`] and return; a [`TaskWorker`] executes the task against the
//! [`SnapshotStore`] later.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::models::DocumentRef;
use crate::snapshot::SnapshotStore;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue is closed")]
    Closed,
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Persist a new payload for the collaborator's snapshot.
    StoreSnapshot {
        collaborator_id: i64,
        document: DocumentRef,
        #[serde(with = "base64_payload")]
        payload: Vec<u8>,
    },
    RecordConnect {
        collaborator_id: i64,
        document: DocumentRef,
    },
    RecordDisconnect {
        collaborator_id: i64,
        document: DocumentRef,
    },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::StoreSnapshot { .. } => "store_snapshot",
            Task::RecordConnect { .. } => "record_connect",
            Task::RecordDisconnect { .. } => "record_disconnect",
        }
    }

    pub fn document(&self) -> &DocumentRef {
        match self {
            Task::StoreSnapshot { document, .. }
            | Task::RecordConnect { document, .. }
            | Task::RecordDisconnect { document, .. } => document,
        }
    }

    /// Run the task. Every task is safe to repeat.
    pub fn execute(&self, store: &SnapshotStore) -> Result<(), rusqlite::Error> {
        match self {
            Task::StoreSnapshot {
                collaborator_id,
                document,
                payload,
            } => {
                store.get_or_create(*collaborator_id, document)?;
                store.update_data(*collaborator_id, document, payload)?;
            }
            Task::RecordConnect {
                collaborator_id,
                document,
            } => store.mark_connected(*collaborator_id, document, true)?,
            Task::RecordDisconnect {
                collaborator_id,
                document,
            } => store.mark_connected(*collaborator_id, document, false)?,
        }
        Ok(())
    }
}

mod base64_payload {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn dispatch(&self, task: Task) -> Result<(), QueueError>;
}

/// In-process queue backed by a bounded tokio channel.
#[derive(Clone)]
pub struct LocalQueue {
    sender: mpsc::Sender<Task>,
}

impl LocalQueue {
    /// Create the queue and the receiving end a [`TaskWorker`] consumes.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Task>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TaskQueue for LocalQueue {
    async fn dispatch(&self, task: Task) -> Result<(), QueueError> {
        debug!("Dispatching {} for {}", task.kind(), task.document());
        self.sender.send(task).await.map_err(|_| QueueError::Closed)
    }
}

/// Drains a [`LocalQueue`] and executes tasks with bounded retries.
pub struct TaskWorker {
    receiver: mpsc::Receiver<Task>,
    store: SnapshotStore,
    max_attempts: u32,
    backoff: Duration,
}

impl TaskWorker {
    pub fn new(
        receiver: mpsc::Receiver<Task>,
        store: SnapshotStore,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            receiver,
            store,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Process tasks until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.receiver.recv().await {
            self.process(&task).await;
        }
        debug!("Task queue closed, worker exiting");
    }

    /// Execute one task, retrying with linear backoff. Returns whether it
    /// eventually succeeded.
    pub async fn process(&self, task: &Task) -> bool {
        for attempt in 1..=self.max_attempts {
            match task.execute(&self.store) {
                Ok(()) => return true,
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "{} for {} failed (attempt {}/{}): {}",
                        task.kind(),
                        task.document(),
                        attempt,
                        self.max_attempts,
                        e
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    error!(
                        "{} for {} dropped after {} attempts: {}",
                        task.kind(),
                        task.document(),
                        attempt,
                        e
                    );
                }
            }
        }
        false
    }
}

/// Queue that only records dispatched tasks.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    tasks: Arc<Mutex<Vec<Task>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.lock().clone()
    }

    pub fn drain(&self) -> Vec<Task> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Task>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn dispatch(&self, task: Task) -> Result<(), QueueError> {
        self.lock().push(task);
        Ok(())
    }
}
