//! Background tasks
//!
//! Durable task queue: a distributor enqueues typed tasks, a broker stores
//! them, and a processor claims and executes them with bounded exponential
//! retries. Tasks that exhaust their retries are archived.

mod broker;
mod distributor;
mod pg_broker;
mod processor;
mod send_verify_email;
mod types;

pub use broker::{BrokerError, MemoryBroker, TaskBroker};
pub use distributor::{
    BrokerTaskDistributor, PayloadSendVerifyEmail, TaskDistributor, TASK_SEND_VERIFY_EMAIL,
};
pub use pg_broker::PgTaskBroker;
pub use processor::{
    ProcessorConfig, ProcessorHandle, TaskError, TaskHandler, TaskOutcome, TaskProcessor,
};
pub use send_verify_email::SendVerifyEmailHandler;
pub use types::{
    NewTask, RetryPolicy, TaskInfo, TaskMessage, TaskOptions, TaskState, DEFAULT_MAX_RETRY,
    QUEUE_CRITICAL, QUEUE_DEFAULT,
};
