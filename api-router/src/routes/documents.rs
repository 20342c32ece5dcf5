use std::path::Path as FsPath;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use common::{
    error::AppError,
    storage::types::{
        document::Document,
        ingestion_task::{IngestionTask, TaskPayload},
        page_node::PageNode,
    },
};

use crate::{api_state::ApiState, error::ApiError};

/// Characters of page text included in document detail responses.
const PAGE_PREVIEW_CHARS: usize = 100;

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    #[form_data(limit = "104857600")]
    pub file: FieldData<NamedTempFile>,
}

#[derive(Serialize)]
pub struct DocumentUploadResponse {
    document_id: String,
    file_name: String,
    status: String,
}

#[derive(Serialize)]
pub struct DocumentSummary {
    document_id: String,
    file_name: String,
    page_count: u32,
    status: String,
}

#[derive(Serialize)]
pub struct DocumentListResponse {
    total_documents: usize,
    documents: Vec<DocumentSummary>,
}

#[derive(Serialize)]
pub struct PageInfo {
    page_number: u32,
    has_image: bool,
    text_preview: String,
}

#[derive(Serialize)]
pub struct DocumentDetailResponse {
    document_id: String,
    file_name: String,
    page_count: u32,
    status: String,
    pages: Vec<PageInfo>,
}

#[derive(Serialize)]
pub struct DeleteDocumentResponse {
    document_id: String,
    status: String,
    images_deleted: usize,
}

impl From<&Document> for DocumentSummary {
    fn from(document: &Document) -> Self {
        Self {
            document_id: document.id.clone(),
            file_name: document.file_name.clone(),
            page_count: document.page_count,
            status: document.status.label().to_string(),
        }
    }
}

fn validate_pdf_file_name(file_name: Option<&str>) -> Result<String, ApiError> {
    let file_name = file_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::ValidationError("No filename provided".to_string()))?;

    if !file_name.to_ascii_lowercase().ends_with(".pdf") {
        return Err(ApiError::ValidationError(format!(
            "Invalid file type. Expected PDF, got: {file_name}"
        )));
    }

    Ok(file_name.to_string())
}

/// Accepts a PDF upload, stores it, and queues it for background
/// ingestion. Re-uploading identical content returns the existing
/// document instead of indexing it twice.
pub async fn upload_document(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    validate_pdf_file_name(input.file.metadata.file_name.as_deref())?;

    let (document, created) = Document::from_upload(
        input.file,
        &state.db,
        FsPath::new(&state.config.data_dir),
    )
    .await
    .map_err(AppError::from)?;

    if !created {
        return Ok((
            StatusCode::OK,
            Json(DocumentUploadResponse {
                document_id: document.id,
                file_name: document.file_name,
                status: document.status.label().to_string(),
            }),
        ));
    }

    let task = IngestionTask::create_and_add_to_db(
        TaskPayload::Add {
            document_id: document.id.clone(),
            pdf_path: document.source_path.clone(),
            file_name: document.file_name.clone(),
        },
        &state.db,
    )
    .await?;

    info!(
        document_id = %document.id,
        task_id = %task.id,
        file_name = %document.file_name,
        "Document upload accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(DocumentUploadResponse {
            document_id: document.id,
            file_name: document.file_name,
            status: "processing".to_string(),
        }),
    ))
}

pub async fn list_documents(
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let documents = Document::list_all(&state.db).await?;

    let summaries: Vec<DocumentSummary> = documents.iter().map(DocumentSummary::from).collect();

    Ok(Json(DocumentListResponse {
        total_documents: summaries.len(),
        documents: summaries,
    }))
}

pub async fn get_document(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document: Document = state
        .db
        .get_item(&id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("Document not found: {id}")))?;

    let pages = PageNode::get_by_document_id(&id, &state.db).await?;

    Ok(Json(DocumentDetailResponse {
        document_id: document.id,
        file_name: document.file_name,
        page_count: document.page_count,
        status: document.status.label().to_string(),
        pages: pages
            .iter()
            .map(|page| PageInfo {
                page_number: page.page_number,
                has_image: page.image_path.is_some(),
                text_preview: page.text_preview(PAGE_PREVIEW_CHARS),
            })
            .collect(),
    }))
}

/// Replaces an existing document's PDF, keeping its id. The old pages are
/// torn down by the worker before the new file is indexed.
pub async fn replace_document(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = validate_pdf_file_name(input.file.metadata.file_name.as_deref())?;

    let document: Document = state
        .db
        .get_item(&id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("Document not found: {id}")))?;

    let sha256 = Document::compute_sha(&input.file.contents).map_err(AppError::from)?;
    let sanitized = Document::sanitize_file_name(&file_name);
    let new_path = Document::persist_file(
        &id,
        input.file.contents,
        &sanitized,
        FsPath::new(&state.config.data_dir),
    )
    .await
    .map_err(AppError::from)?
    .to_string_lossy()
    .into_owned();

    // Drop the previous PDF unless the new one landed on the same path
    if document.source_path != new_path && FsPath::new(&document.source_path).exists() {
        if let Err(err) = tokio::fs::remove_file(&document.source_path).await {
            warn!(document_id = %id, error = %err, "failed to remove replaced PDF");
        }
    }

    Document::set_source(&id, &file_name, &sha256, &new_path, &state.db).await?;

    let task = IngestionTask::create_and_add_to_db(
        TaskPayload::Replace {
            document_id: id.clone(),
            pdf_path: new_path,
            file_name: file_name.clone(),
        },
        &state.db,
    )
    .await?;

    info!(
        document_id = %id,
        task_id = %task.id,
        file_name = %file_name,
        "Document replacement accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(DocumentUploadResponse {
            document_id: id,
            file_name,
            status: "processing".to_string(),
        }),
    ))
}

pub async fn remove_document(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (document, images_deleted) =
        Document::delete_cascade(&id, &state.db, &state.storage).await?;

    Ok(Json(DeleteDocumentResponse {
        document_id: document.id,
        status: "deleted".to_string(),
        images_deleted,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_pdf_file_name() {
        assert!(validate_pdf_file_name(Some("manual.pdf")).is_ok());
        assert!(validate_pdf_file_name(Some("MANUAL.PDF")).is_ok());

        assert!(validate_pdf_file_name(None).is_err());
        assert!(validate_pdf_file_name(Some("")).is_err());
        assert!(validate_pdf_file_name(Some("   ")).is_err());
        assert!(validate_pdf_file_name(Some("notes.txt")).is_err());
        assert!(validate_pdf_file_name(Some("pdf")).is_err());
    }
}
