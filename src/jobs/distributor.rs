//! Task distributor
//!
//! The producer side of the queue. Request handlers only ever see this
//! trait, never the broker, so tests can substitute a recording or failing
//! distributor.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::broker::{BrokerError, TaskBroker};
use super::types::{NewTask, TaskInfo, TaskOptions};

pub const TASK_SEND_VERIFY_EMAIL: &str = "task:send_verify_email";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSendVerifyEmail {
    pub username: String,
}

#[async_trait]
pub trait TaskDistributor: Send + Sync {
    async fn enqueue(&self, task: NewTask) -> Result<TaskInfo, BrokerError>;

    /// Enqueue the verification email task for a freshly created user.
    async fn distribute_send_verify_email(
        &self,
        payload: &PayloadSendVerifyEmail,
        options: TaskOptions,
    ) -> Result<TaskInfo, BrokerError> {
        let task = NewTask::json(TASK_SEND_VERIFY_EMAIL, payload)?.with_options(options);
        self.enqueue(task).await
    }
}

/// Distributor that hands tasks straight to a broker.
#[derive(Clone)]
pub struct BrokerTaskDistributor {
    broker: Arc<dyn TaskBroker>,
}

impl BrokerTaskDistributor {
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl TaskDistributor for BrokerTaskDistributor {
    async fn enqueue(&self, task: NewTask) -> Result<TaskInfo, BrokerError> {
        let task_type = task.task_type.clone();
        let info = self.broker.enqueue(task).await?;

        tracing::info!(
            task_id = %info.id,
            task_type = %task_type,
            queue = %info.queue,
            max_retry = info.max_retry,
            "Enqueued task"
        );

        Ok(info)
    }
}
