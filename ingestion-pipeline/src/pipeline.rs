use std::{path::Path, sync::Arc};

use tokio::time::Duration;
use tracing::{info, info_span, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            document::Document,
            ingestion_task::{IngestionTask, TaskErrorInfo, TaskPayload},
            page_node::PageNode,
        },
    },
    utils::embedding::EmbeddingProvider,
};

use crate::parse::{ParseClient, ParsedDocument};

/// Pages are embedded in batches to keep request payloads reasonable.
const EMBED_BATCH_SIZE: usize = 16;

/// Glue between the task queue and the external collaborators: hands the
/// PDF to the parse service, the page text to the embedding API, and the
/// results to the vector database and image store.
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    parse_client: ParseClient,
    embedding_provider: Arc<EmbeddingProvider>,
    storage: StorageManager,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        parse_client: ParseClient,
        embedding_provider: Arc<EmbeddingProvider>,
        storage: StorageManager,
    ) -> Self {
        Self {
            db,
            parse_client,
            embedding_provider,
            storage,
        }
    }

    /// Runs one claimed task through its lifecycle: succeed, schedule a
    /// retry, or dead-letter once attempts are exhausted. Dead-lettering
    /// also marks the document record as failed so the UI shows it.
    pub async fn process_task(&self, task: IngestionTask) -> Result<(), AppError> {
        let task_id = task.id.clone();
        let attempt = task.attempts;
        let worker_label = task
            .worker_id
            .clone()
            .unwrap_or_else(|| "unknown-worker".to_string());
        let span = info_span!(
            "ingestion_task",
            %task_id,
            attempt,
            worker_id = %worker_label,
            document_id = %task.payload.document_id()
        );
        let _enter = span.enter();

        match self.run(&task).await {
            Ok(page_count) => {
                task.mark_succeeded(&self.db).await?;
                info!(%task_id, attempt, page_count, "ingestion task succeeded");
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                let error_info = TaskErrorInfo {
                    code: None,
                    message: reason.clone(),
                };

                if task.can_retry() {
                    let delay = Self::retry_delay(task.attempts);
                    task.mark_failed(error_info, delay, &self.db).await?;
                    warn!(
                        %task_id,
                        attempt = task.attempts,
                        retry_in_secs = delay.as_secs(),
                        "ingestion task failed; scheduled retry"
                    );
                } else {
                    task.mark_dead_letter(error_info, &self.db).await?;
                    if let Err(mark_err) =
                        Document::mark_failed(task.payload.document_id(), &reason, &self.db).await
                    {
                        warn!(error = %mark_err, "failed to flag document after dead letter");
                    }
                    warn!(
                        %task_id,
                        attempt = task.attempts,
                        "ingestion task failed; moved to dead letter queue"
                    );
                }

                Err(AppError::Processing(reason))
            }
        }
    }

    async fn run(&self, task: &IngestionTask) -> Result<usize, AppError> {
        match &task.payload {
            TaskPayload::Add {
                document_id,
                pdf_path,
                file_name,
            } => {
                self.ingest_document(document_id, Path::new(pdf_path), file_name)
                    .await
            }
            TaskPayload::Replace {
                document_id,
                pdf_path,
                file_name,
            } => {
                self.teardown_pages(document_id).await?;
                self.ingest_document(document_id, Path::new(pdf_path), file_name)
                    .await
            }
        }
    }

    /// Parses one PDF and indexes its pages: markdown text plus page
    /// screenshot per page, embedded and stored under the document id.
    pub async fn ingest_document(
        &self,
        document_id: &str,
        pdf_path: &Path,
        file_name: &str,
    ) -> Result<usize, AppError> {
        if !pdf_path.exists() {
            return Err(AppError::NotFound(format!(
                "PDF file not found: {}",
                pdf_path.display()
            )));
        }

        let parsed = self.parse_client.parse_pdf(pdf_path).await?;

        if parsed.pages.iter().all(|page| page.md.trim().is_empty()) {
            return Err(AppError::Processing(format!(
                "No content extracted from PDF: {}",
                pdf_path.display()
            )));
        }

        let image_paths = self.store_page_images(document_id, &parsed).await;

        let texts: Vec<String> = parsed.pages.iter().map(|page| page.md.clone()).collect();
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBED_BATCH_SIZE) {
            let batch = self.embedding_provider.embed_batch(chunk.to_vec()).await?;
            embeddings.extend(batch);
        }

        if embeddings.len() != parsed.pages.len() {
            return Err(AppError::InternalError(format!(
                "Embedding count mismatch: {} embeddings for {} pages",
                embeddings.len(),
                parsed.pages.len()
            )));
        }

        let page_count = parsed.pages.len();
        for ((index, page), embedding) in parsed.pages.iter().enumerate().zip(embeddings) {
            let page_number = if page.page > 0 {
                page.page
            } else {
                (index + 1) as u32
            };

            let node = PageNode::new(
                document_id.to_string(),
                file_name.to_string(),
                page_number,
                page.md.clone(),
                image_paths.get(index).cloned().flatten(),
                embedding,
            );
            self.db.store_item(node).await?;
        }

        Document::mark_ready(document_id, page_count as u32, &self.db).await?;
        info!(%document_id, page_count, "document indexed");

        Ok(page_count)
    }

    /// Downloads the page screenshots into the image store. A missing or
    /// failed screenshot never fails the ingestion; the page just has no
    /// image.
    async fn store_page_images(
        &self,
        document_id: &str,
        parsed: &ParsedDocument,
    ) -> Vec<Option<String>> {
        let mut locations = Vec::with_capacity(parsed.pages.len());

        for (index, page) in parsed.pages.iter().enumerate() {
            let page_number = if page.page > 0 {
                page.page
            } else {
                (index + 1) as u32
            };

            let Some(screenshot) = page.screenshot() else {
                locations.push(None);
                continue;
            };

            let location = StorageManager::page_image_location(document_id, page_number);
            match self
                .parse_client
                .fetch_image(&parsed.job_id, &screenshot.name)
                .await
            {
                Ok(bytes) => match self.storage.put(&location, bytes).await {
                    Ok(()) => locations.push(Some(location)),
                    Err(err) => {
                        warn!(%document_id, page_number, error = %err, "failed to store page image");
                        locations.push(None);
                    }
                },
                Err(err) => {
                    warn!(%document_id, page_number, error = %err, "failed to download page image");
                    locations.push(None);
                }
            }
        }

        locations
    }

    /// Removes the indexed pages and images of a document, keeping the
    /// record itself (used before re-ingesting a replacement PDF).
    pub async fn teardown_pages(&self, document_id: &str) -> Result<usize, AppError> {
        PageNode::delete_by_document_id(document_id, &self.db).await?;

        match self.storage.delete_prefix(document_id).await {
            Ok(count) => Ok(count),
            Err(err) => {
                // Mirror of the original: image cleanup problems are logged,
                // never fatal.
                warn!(%document_id, error = %err, "failed to delete page images");
                Ok(0)
            }
        }
    }

    fn retry_delay(attempt: u32) -> Duration {
        const BASE_SECONDS: u64 = 30;
        const MAX_SECONDS: u64 = 15 * 60;

        let capped_attempt = attempt.saturating_sub(1).min(5);
        let multiplier = 2_u64.pow(capped_attempt);
        let delay = BASE_SECONDS * multiplier;

        Duration::from_secs(delay.min(MAX_SECONDS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use common::storage::types::ingestion_task::TaskState;
    use common::utils::config::{AppConfig, LlmProvider, StorageKind};
    use object_store::memory::InMemory;
    use uuid::Uuid;

    fn test_config() -> AppConfig {
        AppConfig {
            parse_api_key: "llx-test".into(),
            parse_region: "na".into(),
            parse_base_url: Some("http://127.0.0.1:9".into()),
            parse_model: "openai-gpt-4-1-mini".into(),
            parse_mode: "parse_page_with_agent".into(),
            parse_high_res_ocr: true,
            parse_table_extraction: true,
            parse_tables_as_html: true,
            parse_poll_interval_secs: 1,
            parse_timeout_secs: 5,
            llm_provider: LlmProvider::OpenAI,
            openai_api_key: "sk-test".into(),
            openai_base_url: "https://api.openai.com/v1".into(),
            openai_chat_model: "gpt-4o-mini".into(),
            gemini_api_key: None,
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta/openai".into(),
            gemini_chat_model: "gemini-2.5-flash".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimensions: 1536,
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "test".into(),
            surrealdb_database: "test".into(),
            data_dir: "./data".into(),
            image_dir: "./data/images".into(),
            http_port: 0,
            storage: StorageKind::Memory,
            upload_max_body_bytes: 1024,
            similarity_top_k: 3,
        }
    }

    async fn test_pipeline() -> (IngestionPipeline, Arc<SurrealDbClient>, StorageManager) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        let storage =
            StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory);
        let parse_client = ParseClient::from_config(&test_config()).expect("parse client");
        let pipeline = IngestionPipeline::new(
            db.clone(),
            parse_client,
            Arc::new(EmbeddingProvider::new_hashed(8)),
            storage.clone(),
        );
        (pipeline, db, storage)
    }

    fn sample_page(document_id: &str, page_number: u32) -> PageNode {
        PageNode::new(
            document_id.to_string(),
            "manual.pdf".to_string(),
            page_number,
            format!("page {page_number} text"),
            Some(StorageManager::page_image_location(
                document_id,
                page_number,
            )),
            vec![0.1, 0.2, 0.3],
        )
    }

    #[test]
    fn test_retry_delay_progression() {
        assert_eq!(IngestionPipeline::retry_delay(0).as_secs(), 30);
        assert_eq!(IngestionPipeline::retry_delay(1).as_secs(), 30);
        assert_eq!(IngestionPipeline::retry_delay(2).as_secs(), 60);
        assert_eq!(IngestionPipeline::retry_delay(3).as_secs(), 120);
        // Capped at 15 minutes
        assert_eq!(IngestionPipeline::retry_delay(20).as_secs(), 15 * 60);
    }

    #[tokio::test]
    async fn test_teardown_pages_keeps_record() {
        let (pipeline, db, storage) = test_pipeline().await;

        let document = Document::new("manual.pdf".into(), "sha".into(), "/nonexistent".into());
        db.store_item(document.clone()).await.expect("store doc");
        db.store_item(sample_page(&document.id, 1))
            .await
            .expect("store page");
        storage
            .put(
                &StorageManager::page_image_location(&document.id, 1),
                Bytes::from_static(b"img"),
            )
            .await
            .expect("store image");

        let images_deleted = pipeline
            .teardown_pages(&document.id)
            .await
            .expect("teardown");
        assert_eq!(images_deleted, 1);

        let record: Option<Document> = db.get_item(&document.id).await.expect("fetch");
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn test_process_task_with_missing_pdf_schedules_retry() {
        let (pipeline, db, _storage) = test_pipeline().await;

        let document = Document::new(
            "manual.pdf".into(),
            "sha".into(),
            "/nonexistent/manual.pdf".into(),
        );
        db.store_item(document.clone()).await.expect("store doc");

        let task = IngestionTask::new(TaskPayload::Add {
            document_id: document.id.clone(),
            pdf_path: "/nonexistent/manual.pdf".into(),
            file_name: "manual.pdf".into(),
        });
        db.store_item(task.clone()).await.expect("store task");

        let claimed = IngestionTask::claim_next_ready(
            &db,
            "worker-test",
            chrono::Utc::now(),
            Duration::from_secs(60),
        )
        .await
        .expect("claim")
        .expect("claimed");

        let result = pipeline.process_task(claimed).await;
        assert!(result.is_err());

        let stored: IngestionTask = db
            .get_item(&task.id)
            .await
            .expect("fetch")
            .expect("task exists");
        assert_eq!(stored.state, TaskState::Failed);
        assert!(stored.error_message.is_some());
    }
}
