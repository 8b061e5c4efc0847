//! Task types and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

pub const QUEUE_CRITICAL: &str = "critical";
pub const QUEUE_DEFAULT: &str = "default";

/// Retry budget when the caller does not pick one
pub const DEFAULT_MAX_RETRY: u32 = 25;

/// Enqueue options: target queue, retry budget and earliest process time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    pub queue: String,
    pub max_retry: u32,
    pub process_at: Option<DateTime<Utc>>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            queue: QUEUE_DEFAULT.to_string(),
            max_retry: DEFAULT_MAX_RETRY,
            process_at: None,
        }
    }
}

impl TaskOptions {
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn process_at(mut self, at: DateTime<Utc>) -> Self {
        self.process_at = Some(at);
        self
    }

    /// Delay processing by `delay` from now.
    pub fn process_in(self, delay: Duration) -> Self {
        let at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        self.process_at(at)
    }
}

/// A task as handed to the broker.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub options: TaskOptions,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            options: TaskOptions::default(),
        }
    }

    /// Build a task from a serializable payload.
    pub fn json<T: Serialize>(task_type: impl Into<String>, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(task_type, serde_json::to_value(payload)?))
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }
}

/// Broker-side task state. Completed tasks are deleted, not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for `process_at`, or ready
    Pending,
    /// Claimed by a worker under a lease
    Active,
    /// Retries exhausted or skipped, kept for manual inspection
    Archived,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::Archived => "archived",
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "active" => Ok(TaskState::Active),
            "archived" => Ok(TaskState::Archived),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

/// A task as stored by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub queue: String,
    pub max_retry: u32,
    /// Number of retries already scheduled
    pub retried: u32,
    pub state: TaskState,
    pub process_at: DateTime<Utc>,
    pub lease_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn from_new(task: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type: task.task_type,
            payload: task.payload,
            queue: task.options.queue,
            max_retry: task.options.max_retry,
            retried: 0,
            state: TaskState::Pending,
            process_at: task.options.process_at.unwrap_or(now),
            lease_until: None,
            last_error: None,
            created_at: now,
        }
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            task_type: self.task_type.clone(),
            queue: self.queue.clone(),
            max_retry: self.max_retry,
            process_at: self.process_at,
        }
    }

    /// Whether another failure may still be retried
    pub fn can_retry(&self) -> bool {
        self.retried < self.max_retry
    }
}

/// Receipt for an accepted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: Uuid,
    pub task_type: String,
    pub queue: String,
    pub max_retry: u32,
    pub process_at: DateTime<Utc>,
}

/// Bounded exponential backoff between retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) added on top of the computed delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(600),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, for tests and local runs.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `retry` (1-indexed), without jitter.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exp = 2_u32.saturating_pow(retry - 1);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }

    /// Delay before retry number `retry`, with random jitter applied.
    pub fn next_delay(&self, retry: u32) -> Duration {
        let delay = self.delay_for_retry(retry);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let factor = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(factor)
    }
}
