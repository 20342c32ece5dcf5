use axum_typed_multipart::FieldData;
use sha2::{Digest, Sha256};
use std::{
    io::{BufReader, Read},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("SurrealDB error: {0}")]
    SurrealError(#[from] surrealdb::Error),

    #[error("Failed to persist file: {0}")]
    PersistError(#[from] tempfile::PersistError),

    #[error("File name missing in metadata")]
    MissingFileName,
}

/// Lifecycle of an ingested manual. `Processing` covers the window between
/// upload and the worker finishing (or exhausting retries on) the parse.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum DocumentStatus {
    Processing,
    Ready,
    Failed { error: String },
}

impl DocumentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed { .. } => "failed",
        }
    }
}

stored_object!(Document, "document", {
    file_name: String,
    sha256: String,
    source_path: String,
    page_count: u32,
    status: DocumentStatus
});

impl Document {
    pub fn new(file_name: String, sha256: String, source_path: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            file_name,
            sha256,
            source_path,
            page_count: 0,
            status: DocumentStatus::Processing,
        }
    }

    /// Registers an uploaded PDF: hashes it, dedups against existing
    /// documents by content, persists the file under
    /// `{data_dir}/{document_id}/{file_name}` and stores the record.
    ///
    /// Returns the document plus `true` when a new record was created, or
    /// the already-ingested document plus `false` on a content match.
    pub async fn from_upload(
        field_data: FieldData<NamedTempFile>,
        db: &SurrealDbClient,
        data_dir: &Path,
    ) -> Result<(Self, bool), FileError> {
        let file = field_data.contents;
        let file_name = field_data
            .metadata
            .file_name
            .ok_or(FileError::MissingFileName)?;

        let sha256 = Self::compute_sha(&file)?;

        if let Some(existing) = Self::find_by_sha256(&sha256, db).await? {
            info!(
                document_id = %existing.id,
                sha256 = %sha256,
                "Upload matches an already ingested document"
            );
            return Ok((existing, false));
        }

        let id = Uuid::new_v4().to_string();
        let sanitized_file_name = Self::sanitize_file_name(&file_name);
        let source_path = Self::persist_file(&id, file, &sanitized_file_name, data_dir)
            .await?
            .to_string_lossy()
            .into_owned();

        let document = Self {
            id,
            source_path,
            ..Self::new(file_name, sha256, String::new())
        };

        db.store_item(document.clone()).await?;

        Ok((document, true))
    }

    /// Streams the file through SHA-256, returning the hex digest.
    pub fn compute_sha(file: &NamedTempFile) -> Result<String, FileError> {
        let mut reader = BufReader::new(file.as_file());
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        let digest = hasher.finalize();
        Ok(format!("{digest:x}"))
    }

    /// Replaces anything outside `[A-Za-z0-9_]` (extension excluded) with
    /// underscores so the name is safe as a path segment.
    pub fn sanitize_file_name(file_name: &str) -> String {
        let sanitize = |part: &str| -> String {
            part.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect()
        };

        match file_name.rfind('.') {
            Some(idx) => {
                let (name, ext) = file_name.split_at(idx);
                format!("{}{}", sanitize(name), ext)
            }
            None => sanitize(file_name),
        }
    }

    /// Persists an uploaded temp file under `{data_dir}/{document_id}/`.
    pub async fn persist_file(
        document_id: &str,
        file: NamedTempFile,
        file_name: &str,
        data_dir: &Path,
    ) -> Result<PathBuf, FileError> {
        let document_dir = data_dir.join(document_id);
        tokio::fs::create_dir_all(&document_dir)
            .await
            .map_err(FileError::Io)?;

        let final_path = document_dir.join(file_name);
        file.persist(&final_path)?;
        info!(path = %final_path.display(), "Persisted uploaded PDF");

        Ok(final_path)
    }

    pub async fn find_by_sha256(
        sha256: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, FileError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE sha256 = $sha256")
            .bind(("table", Self::table_name()))
            .bind(("sha256", sha256.to_string()))
            .await?;

        let documents: Vec<Self> = response.take(0)?;
        Ok(documents.into_iter().next())
    }

    pub async fn find_by_file_name(
        file_name: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE file_name = $file_name")
            .bind(("table", Self::table_name()))
            .bind(("file_name", file_name.to_string()))
            .await?;

        let documents: Vec<Self> = response.take(0)?;
        Ok(documents.into_iter().next())
    }

    /// All documents, newest first.
    pub async fn list_all(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let documents: Vec<Self> = db
            .query("SELECT * FROM type::table($table) ORDER BY created_at DESC")
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;

        Ok(documents)
    }

    pub async fn count(db: &SurrealDbClient) -> Result<usize, AppError> {
        #[derive(serde::Deserialize)]
        struct CountRow {
            count: usize,
        }

        let mut response = db
            .client
            .query("SELECT count() AS count FROM type::table($table) GROUP ALL")
            .bind(("table", Self::table_name()))
            .await?;

        let row: Option<CountRow> = response.take(0)?;
        Ok(row.map_or(0, |r| r.count))
    }

    pub async fn mark_ready(
        id: &str,
        page_count: u32,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut response = db
            .client
            .query(
                "UPDATE type::thing($table, $id)
                 SET status = $status, page_count = $page_count, updated_at = time::now()
                 RETURN *",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("status", DocumentStatus::Ready))
            .bind(("page_count", page_count))
            .await?;

        let updated: Option<Self> = response.take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("Document not found: {id}")))
    }

    pub async fn mark_failed(
        id: &str,
        error: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut response = db
            .client
            .query(
                "UPDATE type::thing($table, $id)
                 SET status = $status, updated_at = time::now()
                 RETURN *",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind((
                "status",
                DocumentStatus::Failed {
                    error: error.to_string(),
                },
            ))
            .await?;

        let updated: Option<Self> = response.take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("Document not found: {id}")))
    }

    /// Points an existing record at a new source PDF (used by replace) and
    /// resets it to `Processing`.
    pub async fn set_source(
        id: &str,
        file_name: &str,
        sha256: &str,
        source_path: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut response = db
            .client
            .query(
                "UPDATE type::thing($table, $id)
                 SET file_name = $file_name, sha256 = $sha256, source_path = $source_path,
                     status = $status, page_count = 0, updated_at = time::now()
                 RETURN *",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("file_name", file_name.to_string()))
            .bind(("sha256", sha256.to_string()))
            .bind(("source_path", source_path.to_string()))
            .bind(("status", DocumentStatus::Processing))
            .await?;

        let updated: Option<Self> = response.take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("Document not found: {id}")))
    }

    /// Deletes a document and everything derived from it: page nodes,
    /// stored page images, the source PDF and finally the record itself.
    /// Image and file cleanup problems are logged, never fatal.
    ///
    /// Returns the deleted record and the number of images removed.
    pub async fn delete_cascade(
        id: &str,
        db: &SurrealDbClient,
        storage: &crate::storage::store::StorageManager,
    ) -> Result<(Self, usize), AppError> {
        let document: Self = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document not found: {id}")))?;

        crate::storage::types::page_node::PageNode::delete_by_document_id(id, db).await?;

        let images_deleted = match storage.delete_prefix(id).await {
            Ok(count) => count,
            Err(err) => {
                warn!(document_id = %id, error = %err, "failed to delete page images");
                0
            }
        };

        if let Err(err) = document.remove_source_file().await {
            warn!(document_id = %id, error = %err, "failed to remove source PDF");
        }

        db.delete_item::<Self>(id).await?;
        info!(document_id = %id, images_deleted, "document deleted");

        Ok((document, images_deleted))
    }

    /// Removes the stored PDF. The per-document directory is removed with
    /// it, but only when the parent is actually named after the document
    /// (batch-ingested files live directly in the data directory).
    pub async fn remove_source_file(&self) -> Result<(), AppError> {
        let file_path = Path::new(&self.source_path);
        if !file_path.exists() {
            warn!(path = %self.source_path, "Source PDF already missing");
            return Ok(());
        }

        match file_path.parent() {
            Some(parent)
                if parent.file_name() == Some(std::ffi::OsStr::new(self.id.as_str())) =>
            {
                tokio::fs::remove_dir_all(parent).await?;
                info!(path = %parent.display(), "Removed document directory");
            }
            _ => {
                tokio::fs::remove_file(file_path).await?;
                info!(path = %self.source_path, "Removed source PDF");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum_typed_multipart::FieldMetadata;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Creates a test temporary file with the given content
    fn create_test_file(content: &[u8], file_name: &str) -> FieldData<NamedTempFile> {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        temp_file
            .write_all(content)
            .expect("Failed to write to temp file");

        let metadata = FieldMetadata {
            name: Some("file".to_string()),
            file_name: Some(file_name.to_string()),
            content_type: None,
            headers: HeaderMap::default(),
        };

        FieldData {
            metadata,
            contents: temp_file,
        }
    }

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_from_upload_creates_record_and_file() {
        let db = memory_db().await;
        let data_dir = tempfile::tempdir().expect("temp dir");

        let field_data = create_test_file(b"%PDF-1.4 test content", "vpos manual.pdf");
        let (document, created) = Document::from_upload(field_data, &db, data_dir.path())
            .await
            .expect("upload failed");

        assert!(created);
        assert_eq!(document.file_name, "vpos manual.pdf");
        assert_eq!(document.status, DocumentStatus::Processing);
        assert_eq!(document.page_count, 0);
        assert!(!document.sha256.is_empty());

        // File lands under {data_dir}/{document_id}/ with a sanitized name
        let expected = data_dir
            .path()
            .join(&document.id)
            .join("vpos_manual.pdf");
        assert!(expected.exists());
        assert_eq!(document.source_path, expected.to_string_lossy());

        let stored: Option<Document> = db.get_item(&document.id).await.expect("fetch");
        assert_eq!(stored.map(|d| d.id), Some(document.id));
    }

    #[tokio::test]
    async fn test_from_upload_dedups_by_content() {
        let db = memory_db().await;
        let data_dir = tempfile::tempdir().expect("temp dir");

        let first = create_test_file(b"identical pdf bytes", "original.pdf");
        let (original, created) = Document::from_upload(first, &db, data_dir.path())
            .await
            .expect("first upload");
        assert!(created);

        let second = create_test_file(b"identical pdf bytes", "renamed.pdf");
        let (duplicate, created) = Document::from_upload(second, &db, data_dir.path())
            .await
            .expect("second upload");

        assert!(!created);
        assert_eq!(duplicate.id, original.id);
        // Dedup keeps the original name
        assert_eq!(duplicate.file_name, "original.pdf");
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let db = memory_db().await;
        let document = Document::new(
            "manual.pdf".into(),
            "sha".into(),
            "/tmp/manual.pdf".into(),
        );
        db.store_item(document.clone()).await.expect("store");

        let ready = Document::mark_ready(&document.id, 42, &db)
            .await
            .expect("mark ready");
        assert_eq!(ready.status, DocumentStatus::Ready);
        assert_eq!(ready.page_count, 42);

        let failed = Document::mark_failed(&document.id, "parse blew up", &db)
            .await
            .expect("mark failed");
        assert_eq!(
            failed.status,
            DocumentStatus::Failed {
                error: "parse blew up".into()
            }
        );
    }

    #[tokio::test]
    async fn test_mark_ready_unknown_document() {
        let db = memory_db().await;
        let result = Document::mark_ready("missing", 1, &db).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_by_file_name_and_count() {
        let db = memory_db().await;
        assert_eq!(Document::count(&db).await.expect("count empty"), 0);

        let doc = Document::new("guide.pdf".into(), "abc".into(), "/tmp/guide.pdf".into());
        db.store_item(doc.clone()).await.expect("store");

        let found = Document::find_by_file_name("guide.pdf", &db)
            .await
            .expect("find");
        assert_eq!(found.map(|d| d.id), Some(doc.id));

        let missing = Document::find_by_file_name("other.pdf", &db)
            .await
            .expect("find missing");
        assert!(missing.is_none());

        assert_eq!(Document::count(&db).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_delete_cascade_clears_everything() {
        use crate::storage::store::StorageManager;
        use crate::storage::types::page_node::PageNode;
        use crate::utils::config::StorageKind;
        use bytes::Bytes;
        use object_store::memory::InMemory;
        use std::sync::Arc;

        let db = memory_db().await;
        let storage =
            StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory);

        let document = Document::new("manual.pdf".into(), "sha".into(), "/nonexistent".into());
        db.store_item(document.clone()).await.expect("store doc");

        for page_number in 1..=2u32 {
            let node = PageNode::new(
                document.id.clone(),
                document.file_name.clone(),
                page_number,
                format!("page {page_number}"),
                Some(StorageManager::page_image_location(
                    &document.id,
                    page_number,
                )),
                vec![0.1, 0.2],
            );
            db.store_item(node).await.expect("store page");
            storage
                .put(
                    &StorageManager::page_image_location(&document.id, page_number),
                    Bytes::from_static(b"img"),
                )
                .await
                .expect("store image");
        }

        let (deleted, images_deleted) = Document::delete_cascade(&document.id, &db, &storage)
            .await
            .expect("delete");

        assert_eq!(deleted.id, document.id);
        assert_eq!(images_deleted, 2);

        let pages = PageNode::get_by_document_id(&document.id, &db)
            .await
            .expect("pages");
        assert!(pages.is_empty());

        let record: Option<Document> = db.get_item(&document.id).await.expect("fetch");
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_delete_cascade_unknown_id() {
        use crate::storage::store::StorageManager;
        use crate::utils::config::StorageKind;
        use object_store::memory::InMemory;
        use std::sync::Arc;

        let db = memory_db().await;
        let storage =
            StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory);

        let result = Document::delete_cascade("missing", &db, &storage).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(
            Document::sanitize_file_name("normal_file.pdf"),
            "normal_file.pdf"
        );
        assert_eq!(
            Document::sanitize_file_name("file with spaces.pdf"),
            "file_with_spaces.pdf"
        );
        assert_eq!(
            Document::sanitize_file_name("../dangerous.pdf"),
            "___dangerous.pdf"
        );
        assert_eq!(Document::sanitize_file_name("no_extension"), "no_extension");
    }
}
