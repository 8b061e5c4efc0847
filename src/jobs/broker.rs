//! Task broker
//!
//! Durable storage for enqueued tasks. A dequeued task is leased, not
//! removed: it is deleted only when a handler succeeds, so a crashed
//! worker's task goes back to pending once its lease expires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::types::{NewTask, TaskInfo, TaskMessage, TaskState};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// The caller's lease expired and the task was requeued or claimed again
    #[error("lease lost on task {0}")]
    LeaseLost(Uuid),

    #[error("corrupt task row: {0}")]
    CorruptTask(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Persist a new pending task.
    async fn enqueue(&self, task: NewTask) -> Result<TaskInfo, BrokerError>;

    /// Claim the oldest ready task, trying `queues` in order.
    async fn dequeue(
        &self,
        queues: &[String],
        lease_until: DateTime<Utc>,
    ) -> Result<Option<TaskMessage>, BrokerError>;

    // `complete`, `retry` and `archive` are fenced by the lease handed out
    // by `dequeue`: they only apply while the task is still active under
    // that exact lease, and fail with `LeaseLost` otherwise.

    /// Remove a task whose handler succeeded.
    async fn complete(&self, id: Uuid, lease: DateTime<Utc>) -> Result<(), BrokerError>;

    /// Return a task to pending with one more retry counted.
    async fn retry(
        &self,
        id: Uuid,
        lease: DateTime<Utc>,
        process_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), BrokerError>;

    /// Move a task to the archive.
    async fn archive(&self, id: Uuid, lease: DateTime<Utc>, error: &str) -> Result<(), BrokerError>;

    /// Return active tasks with an expired lease to pending.
    async fn requeue_expired(&self, now: DateTime<Utc>) -> Result<u64, BrokerError>;

    async fn list_archived(&self, queue: &str) -> Result<Vec<TaskMessage>, BrokerError>;
}

/// In-process broker for tests and single-node development.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    tasks: Arc<Mutex<HashMap<Uuid, TaskMessage>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `BrokerError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn get(&self, id: Uuid) -> Option<TaskMessage> {
        self.tasks.lock().await.get(&id).cloned()
    }

    /// All stored tasks, oldest first.
    pub async fn tasks(&self) -> Vec<TaskMessage> {
        let mut tasks: Vec<_> = self.tasks.lock().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<(), BrokerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("memory broker switched off".to_string()));
        }
        Ok(())
    }
}

/// The task `id`, if it is still active under `lease`
fn leased_task(
    tasks: &mut HashMap<Uuid, TaskMessage>,
    id: Uuid,
    lease: DateTime<Utc>,
) -> Result<&mut TaskMessage, BrokerError> {
    let task = tasks.get_mut(&id).ok_or(BrokerError::TaskNotFound(id))?;
    if task.state != TaskState::Active || task.lease_until != Some(lease) {
        return Err(BrokerError::LeaseLost(id));
    }
    Ok(task)
}

#[async_trait]
impl TaskBroker for MemoryBroker {
    async fn enqueue(&self, task: NewTask) -> Result<TaskInfo, BrokerError> {
        self.check_available()?;
        let message = TaskMessage::from_new(task);
        let info = message.info();
        self.tasks.lock().await.insert(message.id, message);
        Ok(info)
    }

    async fn dequeue(
        &self,
        queues: &[String],
        lease_until: DateTime<Utc>,
    ) -> Result<Option<TaskMessage>, BrokerError> {
        self.check_available()?;
        let now = Utc::now();
        let mut tasks = self.tasks.lock().await;

        for queue in queues {
            let next = tasks
                .values()
                .filter(|t| t.state == TaskState::Pending && &t.queue == queue && t.process_at <= now)
                .min_by_key(|t| (t.process_at, t.created_at))
                .map(|t| t.id);

            if let Some(id) = next {
                if let Some(task) = tasks.get_mut(&id) {
                    task.state = TaskState::Active;
                    task.lease_until = Some(lease_until);
                    return Ok(Some(task.clone()));
                }
            }
        }

        Ok(None)
    }

    async fn complete(&self, id: Uuid, lease: DateTime<Utc>) -> Result<(), BrokerError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock().await;
        leased_task(&mut tasks, id, lease)?;
        tasks.remove(&id);
        Ok(())
    }

    async fn retry(
        &self,
        id: Uuid,
        lease: DateTime<Utc>,
        process_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), BrokerError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock().await;
        let task = leased_task(&mut tasks, id, lease)?;
        task.state = TaskState::Pending;
        task.retried += 1;
        task.process_at = process_at;
        task.lease_until = None;
        task.last_error = Some(error.to_string());
        Ok(())
    }

    async fn archive(&self, id: Uuid, lease: DateTime<Utc>, error: &str) -> Result<(), BrokerError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock().await;
        let task = leased_task(&mut tasks, id, lease)?;
        task.state = TaskState::Archived;
        task.lease_until = None;
        task.last_error = Some(error.to_string());
        Ok(())
    }

    async fn requeue_expired(&self, now: DateTime<Utc>) -> Result<u64, BrokerError> {
        self.check_available()?;
        let mut requeued = 0;
        for task in self.tasks.lock().await.values_mut() {
            let expired = matches!(task.lease_until, Some(lease) if lease < now);
            if task.state == TaskState::Active && expired {
                task.state = TaskState::Pending;
                task.lease_until = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn list_archived(&self, queue: &str) -> Result<Vec<TaskMessage>, BrokerError> {
        self.check_available()?;
        let mut archived: Vec<_> = self
            .tasks
            .lock()
            .await
            .values()
            .filter(|t| t.state == TaskState::Archived && t.queue == queue)
            .cloned()
            .collect();
        archived.sort_by_key(|t| t.created_at);
        Ok(archived)
    }
}
