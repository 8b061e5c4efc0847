//! Task Processor
//!
//! Worker pool consuming the broker. Each worker claims one task at a time
//! under a lease, dispatches it by type, and then completes, retries or
//! archives it. A maintenance loop returns tasks with expired leases to
//! pending so a crashed worker never loses work. Delivery is at least once,
//! so handlers must be idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::broker::{BrokerError, TaskBroker};
use super::types::{RetryPolicy, TaskMessage, QUEUE_CRITICAL, QUEUE_DEFAULT};

/// Handler failure, deciding what happens to the task next
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Transient failure, retried with backoff while budget remains
    #[error("{0}")]
    Retry(String),

    /// Permanent failure, archived immediately
    #[error("skip retry: {0}")]
    SkipRetry(String),
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process_task(&self, task: &TaskMessage) -> Result<(), TaskError>;
}

/// What happened to a processed task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Retried { retried: u32 },
    Archived,
    /// The lease expired while the handler ran; another worker owns the task
    LeaseLost,
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Number of concurrent workers
    pub concurrency: usize,
    /// Queues with relative weights; higher weight is polled first more often
    pub queues: Vec<(String, u32)>,
    /// Idle wait when no task is ready
    pub poll_interval: Duration,
    /// How long a claimed task stays leased to its worker
    pub lease: Duration,
    /// Interval of the expired-lease sweep
    pub recovery_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queues: vec![(QUEUE_CRITICAL.to_string(), 10), (QUEUE_DEFAULT.to_string(), 5)],
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(300),
            recovery_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct TaskProcessor {
    broker: Arc<dyn TaskBroker>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    config: ProcessorConfig,
}

impl TaskProcessor {
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        Self::with_config(broker, ProcessorConfig::default())
    }

    pub fn with_config(broker: Arc<dyn TaskBroker>, config: ProcessorConfig) -> Self {
        Self {
            broker,
            handlers: HashMap::new(),
            config,
        }
    }

    /// Route tasks of `task_type` to `handler`, replacing any previous one.
    pub fn register_handler(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.into(), handler);
    }

    /// Queue polling order for one dequeue: a weighted shuffle, so higher
    /// weight queues usually come first without starving the others.
    fn queue_order(&self) -> Vec<String> {
        let mut remaining: Vec<&(String, u32)> = self.config.queues.iter().collect();
        let mut order = Vec::with_capacity(remaining.len());
        let mut rng = rand::thread_rng();

        while !remaining.is_empty() {
            let total: u64 = remaining.iter().map(|(_, w)| u64::from((*w).max(1))).sum();
            let mut pick = rng.gen_range(0..total);
            let index = remaining
                .iter()
                .position(|(_, w)| {
                    let w = u64::from((*w).max(1));
                    if pick < w {
                        true
                    } else {
                        pick -= w;
                        false
                    }
                })
                .unwrap_or(0);
            order.push(remaining.remove(index).0.clone());
        }

        order
    }

    /// Claim and handle at most one ready task.
    ///
    /// Returns `Ok(None)` when no task is ready in any queue.
    pub async fn process_next(&self) -> Result<Option<TaskOutcome>, BrokerError> {
        let queues = self.queue_order();
        let lease_for =
            chrono::Duration::from_std(self.config.lease).unwrap_or(chrono::Duration::seconds(300));

        let Some(task) = self.broker.dequeue(&queues, Utc::now() + lease_for).await? else {
            return Ok(None);
        };

        let result = match self.handlers.get(&task.task_type) {
            Some(handler) => handler.process_task(&task).await,
            None => Err(TaskError::SkipRetry(format!(
                "no handler registered for {}",
                task.task_type
            ))),
        };

        let Some(lease) = task.lease_until else {
            return Err(BrokerError::CorruptTask(format!("claimed task {} has no lease", task.id)));
        };

        let finished = match result {
            Ok(()) => self.broker.complete(task.id, lease).await.map(|()| {
                tracing::info!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    queue = %task.queue,
                    "Processed task"
                );
                TaskOutcome::Completed
            }),
            Err(TaskError::Retry(error)) if task.can_retry() => {
                let retried = task.retried + 1;
                let delay = self.config.retry.next_delay(retried);
                let process_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                self.broker
                    .retry(task.id, lease, process_at, &error)
                    .await
                    .map(|()| {
                        tracing::warn!(
                            task_id = %task.id,
                            task_type = %task.task_type,
                            retried = retried,
                            max_retry = task.max_retry,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Task failed, scheduled retry"
                        );
                        TaskOutcome::Retried { retried }
                    })
            }
            Err(err) => {
                let error = err.to_string();
                self.broker.archive(task.id, lease, &error).await.map(|()| {
                    tracing::error!(
                        task_id = %task.id,
                        task_type = %task.task_type,
                        retried = task.retried,
                        error = %error,
                        "Task archived"
                    );
                    TaskOutcome::Archived
                })
            }
        };

        let outcome = match finished {
            Ok(outcome) => outcome,
            Err(BrokerError::LeaseLost(_)) => {
                // The task was requeued and belongs to whoever claimed it next
                tracing::warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    "Task lease expired before processing finished, result dropped"
                );
                TaskOutcome::LeaseLost
            }
            Err(e) => return Err(e),
        };

        Ok(Some(outcome))
    }

    /// Spawn the worker pool and the lease recovery loop.
    pub fn start(self) -> ProcessorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let concurrency = self.config.concurrency.max(1);
        let processor = Arc::new(self);

        tracing::info!(
            concurrency = concurrency,
            queues = ?processor.config.queues,
            "Task processor started"
        );

        let mut workers = Vec::with_capacity(concurrency + 1);
        for worker in 0..concurrency {
            let processor = Arc::clone(&processor);
            let shutdown = shutdown_rx.clone();
            workers.push(tokio::spawn(async move {
                processor.run_worker(worker, shutdown).await;
            }));
        }

        let recovery = Arc::clone(&processor);
        workers.push(tokio::spawn(async move {
            recovery.run_recovery(shutdown_rx).await;
        }));

        ProcessorHandle {
            shutdown: shutdown_tx,
            workers,
        }
    }

    async fn run_worker(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.process_next().await {
                // More work may be ready, poll again straight away
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => tracing::error!(worker = worker, error = %e, "Task broker error"),
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::debug!(worker = worker, "Task worker stopped");
    }

    async fn run_recovery(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.recovery_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.broker.requeue_expired(Utc::now()).await {
                        tracing::error!(error = %e, "Lease recovery failed");
                    }
                }
            }
        }
    }
}

/// Handle to a running processor
pub struct ProcessorHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl ProcessorHandle {
    /// Stop claiming new tasks and wait for in-flight tasks to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Task worker panicked");
            }
        }
        tracing::info!("Task processor stopped");
    }
}
