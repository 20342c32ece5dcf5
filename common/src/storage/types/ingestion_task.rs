use std::time::Duration;

use chrono::Duration as ChronoDuration;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE_SECS: i64 = 300;

/// Work item payloads. Replace keeps the document id of the record it
/// refreshes; the worker tears the old pages down first.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum TaskPayload {
    Add {
        document_id: String,
        pdf_path: String,
        file_name: String,
    },
    Replace {
        document_id: String,
        pdf_path: String,
        file_name: String,
    },
}

impl TaskPayload {
    pub fn document_id(&self) -> &str {
        match self {
            TaskPayload::Add { document_id, .. } | TaskPayload::Replace { document_id, .. } => {
                document_id
            }
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            TaskPayload::Add { file_name, .. } | TaskPayload::Replace { file_name, .. } => {
                file_name
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum TaskState {
    #[serde(rename = "Pending")]
    #[default]
    Pending,
    #[serde(rename = "Processing")]
    Processing,
    #[serde(rename = "Succeeded")]
    Succeeded,
    #[serde(rename = "Failed")]
    Failed,
    #[serde(rename = "DeadLetter")]
    DeadLetter,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "Pending",
            TaskState::Processing => "Processing",
            TaskState::Succeeded => "Succeeded",
            TaskState::Failed => "Failed",
            TaskState::DeadLetter => "DeadLetter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::DeadLetter)
    }

    pub fn display_label(&self) -> &'static str {
        match self {
            TaskState::Pending => "Pending",
            TaskState::Processing => "Processing",
            TaskState::Succeeded => "Completed",
            TaskState::Failed => "Retrying",
            TaskState::DeadLetter => "Dead Letter",
        }
    }

    /// Valid lifecycle edges. Claiming moves Pending/Failed to Processing;
    /// everything else happens from Processing, except dead-lettering a
    /// Failed task.
    fn can_transition(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Pending | TaskState::Failed, TaskState::Processing)
                | (TaskState::Processing, TaskState::Succeeded)
                | (TaskState::Processing, TaskState::Failed)
                | (
                    TaskState::Failed | TaskState::Processing,
                    TaskState::DeadLetter
                )
        )
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct TaskErrorInfo {
    pub code: Option<String>,
    pub message: String,
}

fn invalid_transition(state: TaskState, next: TaskState) -> AppError {
    AppError::Validation(format!(
        "Invalid task transition: {} -> {}",
        state.as_str(),
        next.as_str()
    ))
}

fn check_transition(state: TaskState, next: TaskState) -> Result<(), AppError> {
    if state.can_transition(next) {
        Ok(())
    } else {
        Err(invalid_transition(state, next))
    }
}

stored_object!(IngestionTask, "ingestion_task", {
    payload: TaskPayload,
    state: TaskState,
    attempts: u32,
    max_attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    scheduled_at: chrono::DateTime<chrono::Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<chrono::DateTime<chrono::Utc>>,
    lease_duration_secs: i64,
    worker_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    last_error_at: Option<chrono::DateTime<chrono::Utc>>
});

impl IngestionTask {
    pub fn new(payload: TaskPayload) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            state: TaskState::Pending,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            scheduled_at: now,
            locked_at: None,
            lease_duration_secs: DEFAULT_LEASE_SECS,
            worker_id: None,
            error_code: None,
            error_message: None,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub async fn create_and_add_to_db(
        payload: TaskPayload,
        db: &SurrealDbClient,
    ) -> Result<IngestionTask, AppError> {
        let task = Self::new(payload);
        db.store_item(task.clone()).await?;
        Ok(task)
    }

    /// Atomically claims the oldest ready task for this worker: Pending or
    /// Failed tasks whose retry time has come, plus Processing tasks whose
    /// lease expired (a crashed worker). Attempts are counted on claim.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        lease_duration: Duration,
    ) -> Result<Option<IngestionTask>, AppError> {
        const CLAIM_QUERY: &str = r#"
            UPDATE (
                SELECT * FROM type::table($table)
                WHERE scheduled_at <= $now
                  AND (
                        (state IN $ready_states AND attempts < max_attempts)
                        OR (
                            state = $processing_state
                            AND locked_at != NONE
                            AND time::unix($now) - time::unix(locked_at) >= lease_duration_secs
                        )
                  )
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
            )
            SET state = $processing_state,
                attempts = if attempts + 1 > max_attempts THEN max_attempts ELSE attempts + 1 END,
                locked_at = $now,
                worker_id = $worker_id,
                lease_duration_secs = $lease_secs,
                updated_at = $now
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind((
                "ready_states",
                vec![TaskState::Pending.as_str(), TaskState::Failed.as_str()],
            ))
            .bind(("processing_state", TaskState::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_secs", lease_duration.as_secs() as i64))
            .await?;

        let task: Option<IngestionTask> = result.take(0)?;
        Ok(task)
    }

    pub async fn mark_succeeded(&self, db: &SurrealDbClient) -> Result<IngestionTask, AppError> {
        check_transition(self.state, TaskState::Succeeded)?;

        const COMPLETE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $succeeded,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                error_code = NONE,
                error_message = NONE,
                last_error_at = NONE
            WHERE state = $processing AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(COMPLETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("succeeded", TaskState::Succeeded.as_str()))
            .bind(("processing", TaskState::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<IngestionTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(self.state, TaskState::Succeeded))
    }

    pub async fn mark_failed(
        &self,
        error: TaskErrorInfo,
        retry_delay: Duration,
        db: &SurrealDbClient,
    ) -> Result<IngestionTask, AppError> {
        check_transition(self.state, TaskState::Failed)?;

        let now = chrono::Utc::now();
        let retry_at = now
            + ChronoDuration::from_std(retry_delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $failed,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                scheduled_at = $retry_at,
                error_code = $error_code,
                error_message = $error_message,
                last_error_at = $now
            WHERE state = $processing AND worker_id = $worker_id
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("failed", TaskState::Failed.as_str()))
            .bind(("processing", TaskState::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("retry_at", SurrealDatetime::from(retry_at)))
            .bind(("error_code", error.code.clone()))
            .bind(("error_message", error.message.clone()))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<IngestionTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(self.state, TaskState::Failed))
    }

    pub async fn mark_dead_letter(
        &self,
        error: TaskErrorInfo,
        db: &SurrealDbClient,
    ) -> Result<IngestionTask, AppError> {
        check_transition(self.state, TaskState::DeadLetter)?;

        const DEAD_LETTER_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $dead,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                error_code = $error_code,
                error_message = $error_message,
                last_error_at = $now
            WHERE state IN $allow_states
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(DEAD_LETTER_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("dead", TaskState::DeadLetter.as_str()))
            .bind((
                "allow_states",
                vec![TaskState::Processing.as_str(), TaskState::Failed.as_str()],
            ))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("error_code", error.code.clone()))
            .bind(("error_message", error.message.clone()))
            .await?;

        let updated: Option<IngestionTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(self.state, TaskState::DeadLetter))
    }

    /// Tasks that still need worker attention, oldest first.
    pub async fn get_unfinished_tasks(
        db: &SurrealDbClient,
    ) -> Result<Vec<IngestionTask>, AppError> {
        let tasks: Vec<IngestionTask> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE state IN $active_states
                 ORDER BY scheduled_at ASC, created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind((
                "active_states",
                vec![
                    TaskState::Pending.as_str(),
                    TaskState::Processing.as_str(),
                    TaskState::Failed.as_str(),
                ],
            ))
            .await?
            .take(0)?;

        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_payload() -> TaskPayload {
        TaskPayload::Add {
            document_id: "doc123".to_string(),
            pdf_path: "/tmp/manual.pdf".to_string(),
            file_name: "manual.pdf".to_string(),
        }
    }

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_new_task_defaults() {
        let payload = create_payload();
        let task = IngestionTask::new(payload.clone());

        assert_eq!(task.payload, payload);
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.max_attempts, MAX_ATTEMPTS);
        assert!(task.locked_at.is_none());
        assert!(task.worker_id.is_none());
        assert_eq!(task.payload.document_id(), "doc123");
    }

    #[tokio::test]
    async fn test_create_and_store_task() {
        let db = memory_db().await;

        let created = IngestionTask::create_and_add_to_db(create_payload(), &db)
            .await
            .expect("store");

        let stored: Option<IngestionTask> = db
            .get_item::<IngestionTask>(&created.id)
            .await
            .expect("fetch");

        let stored = stored.expect("task exists");
        assert_eq!(stored.id, created.id);
        assert_eq!(stored.state, TaskState::Pending);
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn test_claim_and_succeed() {
        let db = memory_db().await;
        let task = IngestionTask::new(create_payload());
        db.store_item(task.clone()).await.expect("store");

        let worker_id = "worker-1";
        let now = chrono::Utc::now();
        let claimed = IngestionTask::claim_next_ready(&db, worker_id, now, Duration::from_secs(60))
            .await
            .expect("claim");

        let claimed = claimed.expect("task claimed");
        assert_eq!(claimed.state, TaskState::Processing);
        assert_eq!(claimed.worker_id.as_deref(), Some(worker_id));
        assert_eq!(claimed.attempts, 1);

        // Nothing else is ready while the lease is held
        let second = IngestionTask::claim_next_ready(&db, "worker-2", now, Duration::from_secs(60))
            .await
            .expect("claim");
        assert!(second.is_none());

        let succeeded = claimed.mark_succeeded(&db).await.expect("succeeded");
        assert_eq!(succeeded.state, TaskState::Succeeded);
        assert!(succeeded.worker_id.is_none());
        assert!(succeeded.locked_at.is_none());
    }

    #[tokio::test]
    async fn test_fail_schedules_retry_then_dead_letter() {
        let db = memory_db().await;
        let task = IngestionTask::new(create_payload());
        db.store_item(task.clone()).await.expect("store");

        let worker_id = "worker-dead";
        let now = chrono::Utc::now();
        let claimed = IngestionTask::claim_next_ready(&db, worker_id, now, Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("claimed");

        let error_info = TaskErrorInfo {
            code: Some("parse_error".into()),
            message: "failed".into(),
        };

        let failed = claimed
            .mark_failed(error_info.clone(), Duration::from_secs(30), &db)
            .await
            .expect("failed update");
        assert_eq!(failed.state, TaskState::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("failed"));
        assert!(failed.worker_id.is_none());
        assert!(failed.locked_at.is_none());
        assert!(failed.scheduled_at > now);

        let dead = failed
            .mark_dead_letter(error_info, &db)
            .await
            .expect("dead letter");
        assert_eq!(dead.state, TaskState::DeadLetter);
        assert!(dead.state.is_terminal());
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let db = memory_db().await;
        let task = IngestionTask::new(create_payload());
        db.store_item(task.clone()).await.expect("store");

        // Succeeding a task that was never claimed is a validation error
        let result = task.mark_succeeded(&db).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unfinished_tasks_listing() {
        let db = memory_db().await;
        let task = IngestionTask::new(create_payload());
        db.store_item(task.clone()).await.expect("store");

        let unfinished = IngestionTask::get_unfinished_tasks(&db).await.expect("list");
        assert_eq!(unfinished.len(), 1);

        let claimed = IngestionTask::claim_next_ready(
            &db,
            "worker-1",
            chrono::Utc::now(),
            Duration::from_secs(60),
        )
        .await
        .expect("claim")
        .expect("claimed");
        claimed.mark_succeeded(&db).await.expect("succeed");

        let unfinished = IngestionTask::get_unfinished_tasks(&db).await.expect("list");
        assert!(unfinished.is_empty());
    }
}
