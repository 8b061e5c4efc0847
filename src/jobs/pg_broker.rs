//! Postgres Task Broker
//!
//! Tasks live in the `tasks` table. Workers claim rows with
//! `FOR UPDATE SKIP LOCKED`, so concurrent workers never block on or
//! double-claim the same task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::broker::{BrokerError, TaskBroker};
use super::types::{NewTask, TaskInfo, TaskMessage, TaskState};

type TaskRow = (
    Uuid,
    String,
    serde_json::Value,
    String,
    i32,
    i32,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<String>,
    DateTime<Utc>,
);

const TASK_COLUMNS: &str = "id, task_type, payload, queue, max_retry, retried, state, \
     process_at, lease_until, last_error, created_at";

fn task_from_row(row: TaskRow) -> Result<TaskMessage, BrokerError> {
    let (
        id,
        task_type,
        payload,
        queue,
        max_retry,
        retried,
        state,
        process_at,
        lease_until,
        last_error,
        created_at,
    ) = row;

    let state = state.parse::<TaskState>().map_err(BrokerError::CorruptTask)?;

    Ok(TaskMessage {
        id,
        task_type,
        payload,
        queue,
        max_retry: u32::try_from(max_retry).unwrap_or(0),
        retried: u32::try_from(retried).unwrap_or(0),
        state,
        process_at,
        lease_until,
        last_error,
        created_at,
    })
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[derive(Debug, Clone)]
pub struct PgTaskBroker {
    pool: PgPool,
}

impl PgTaskBroker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Why a lease-fenced write matched no row
    async fn fencing_error(&self, id: Uuid) -> BrokerError {
        let exists: Result<(bool,), sqlx::Error> =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM tasks WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await;

        match exists {
            Ok((true,)) => BrokerError::LeaseLost(id),
            Ok((false,)) => BrokerError::TaskNotFound(id),
            Err(e) => BrokerError::Database(e),
        }
    }
}

#[async_trait]
impl TaskBroker for PgTaskBroker {
    async fn enqueue(&self, task: NewTask) -> Result<TaskInfo, BrokerError> {
        let message = TaskMessage::from_new(task);

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, task_type, payload, queue, max_retry, retried, state,
                process_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, 0, 'pending', $6, $7)
            "#,
        )
        .bind(message.id)
        .bind(&message.task_type)
        .bind(&message.payload)
        .bind(&message.queue)
        .bind(to_i32(message.max_retry))
        .bind(message.process_at)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(message.info())
    }

    async fn dequeue(
        &self,
        queues: &[String],
        lease_until: DateTime<Utc>,
    ) -> Result<Option<TaskMessage>, BrokerError> {
        for queue in queues {
            let row: Option<TaskRow> = sqlx::query_as(&format!(
                r#"
                UPDATE tasks
                SET state = 'active', lease_until = $2
                WHERE id = (
                    SELECT id FROM tasks
                    WHERE state = 'pending' AND queue = $1 AND process_at <= NOW()
                    ORDER BY process_at, created_at
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING {TASK_COLUMNS}
                "#
            ))
            .bind(queue)
            .bind(lease_until)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                return task_from_row(row).map(Some);
            }
        }

        Ok(None)
    }

    async fn complete(&self, id: Uuid, lease: DateTime<Utc>) -> Result<(), BrokerError> {
        let result = sqlx::query(
            "DELETE FROM tasks WHERE id = $1 AND state = 'active' AND lease_until = $2",
        )
        .bind(id)
        .bind(lease)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.fencing_error(id).await);
        }
        Ok(())
    }

    async fn retry(
        &self,
        id: Uuid,
        lease: DateTime<Utc>,
        process_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), BrokerError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'pending', retried = retried + 1, process_at = $3,
                lease_until = NULL, last_error = $4
            WHERE id = $1 AND state = 'active' AND lease_until = $2
            "#,
        )
        .bind(id)
        .bind(lease)
        .bind(process_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.fencing_error(id).await);
        }
        Ok(())
    }

    async fn archive(&self, id: Uuid, lease: DateTime<Utc>, error: &str) -> Result<(), BrokerError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'archived', lease_until = NULL, last_error = $3
            WHERE id = $1 AND state = 'active' AND lease_until = $2
            "#,
        )
        .bind(id)
        .bind(lease)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.fencing_error(id).await);
        }
        Ok(())
    }

    async fn requeue_expired(&self, now: DateTime<Utc>) -> Result<u64, BrokerError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'pending', lease_until = NULL
            WHERE state = 'active' AND lease_until < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            tracing::warn!(requeued = requeued, "Requeued tasks with expired leases");
        }
        Ok(requeued)
    }

    async fn list_archived(&self, queue: &str) -> Result<Vec<TaskMessage>, BrokerError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE state = 'archived' AND queue = $1
            ORDER BY created_at
            "#
        ))
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }
}
