#![allow(clippy::missing_docs_in_private_items)]

pub mod parse;
pub mod pipeline;

use chrono::Utc;
use common::storage::{
    db::SurrealDbClient,
    types::ingestion_task::{IngestionTask, DEFAULT_LEASE_SECS},
};
pub use pipeline::IngestionPipeline;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// How long an idle worker sleeps before polling the queue again.
const IDLE_BACKOFF: Duration = Duration::from_millis(500);
/// Backoff after a failed claim, so a broken database connection does not
/// spin the loop.
const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = format!("ingestion-worker-{}", Uuid::new_v4());
    let lease_duration = Duration::from_secs(DEFAULT_LEASE_SECS as u64);
    info!(%worker_id, "Ingestion worker started");

    loop {
        match IngestionTask::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(task)) => {
                let task_id = task.id.clone();
                info!(
                    %worker_id,
                    %task_id,
                    attempt = task.attempts,
                    "claimed ingestion task"
                );
                // process_task handles retry scheduling itself; the error
                // here is only worth a log line
                if let Err(err) = ingestion_pipeline.process_task(task).await {
                    error!(%worker_id, %task_id, error = %err, "ingestion task failed");
                }
            }
            Ok(None) => {
                sleep(IDLE_BACKOFF).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim ingestion task");
                warn!(
                    backoff_secs = CLAIM_ERROR_BACKOFF.as_secs(),
                    "Backing off after claim error"
                );
                sleep(CLAIM_ERROR_BACKOFF).await;
            }
        }
    }
}
