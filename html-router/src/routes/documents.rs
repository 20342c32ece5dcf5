use std::path::Path as FsPath;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use futures::try_join;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::info;

use common::{
    error::AppError,
    storage::types::{
        document::Document,
        ingestion_task::{IngestionTask, TaskPayload},
    },
};

use crate::{
    html_state::HtmlState,
    middlewares::response_middleware::{HtmlError, TemplateResponse},
    routes::index::{document_rows, task_rows, DocumentRow, TaskRow},
};

#[derive(Debug, TryFromMultipart)]
pub struct UploadForm {
    #[form_data(limit = "104857600")]
    pub file: FieldData<NamedTempFile>,
}

#[derive(Serialize)]
struct DocumentsData {
    documents: Vec<DocumentRow>,
    active_tasks: Vec<TaskRow>,
    notice: Option<String>,
}

async fn documents_block(
    state: &HtmlState,
    notice: Option<String>,
) -> Result<TemplateResponse, HtmlError> {
    let (documents, active_tasks) = try_join!(
        Document::list_all(&state.db),
        IngestionTask::get_unfinished_tasks(&state.db)
    )?;

    Ok(TemplateResponse::new_partial(
        "index/base.html",
        "documents_block",
        DocumentsData {
            documents: document_rows(&documents),
            active_tasks: task_rows(&active_tasks),
            notice,
        },
    ))
}

/// Accepts a manual from the upload form and queues it for ingestion,
/// then re-renders the document list.
pub async fn upload_handler(
    State(state): State<HtmlState>,
    TypedMultipart(input): TypedMultipart<UploadForm>,
) -> Result<impl IntoResponse, HtmlError> {
    let file_name = input
        .file
        .metadata
        .file_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::Validation("No filename provided".to_string()))?;

    if !file_name.to_ascii_lowercase().ends_with(".pdf") {
        return Err(HtmlError::from(AppError::Validation(format!(
            "Invalid file type. Expected PDF, got: {file_name}"
        ))));
    }

    let (document, created) = Document::from_upload(
        input.file,
        &state.db,
        FsPath::new(&state.config.data_dir),
    )
    .await
    .map_err(AppError::from)?;

    let notice = if created {
        IngestionTask::create_and_add_to_db(
            TaskPayload::Add {
                document_id: document.id.clone(),
                pdf_path: document.source_path.clone(),
                file_name: document.file_name.clone(),
            },
            &state.db,
        )
        .await?;

        info!(document_id = %document.id, file_name = %document.file_name, "Upload queued");
        format!("{} queued for processing.", document.file_name)
    } else {
        format!("{} is already in the library.", document.file_name)
    };

    documents_block(&state, Some(notice)).await
}

/// Deletes a document and re-renders the document list.
pub async fn delete_document_handler(
    State(state): State<HtmlState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HtmlError> {
    let (document, images_deleted) =
        Document::delete_cascade(&id, &state.db, &state.storage).await?;

    info!(document_id = %id, images_deleted, "Document deleted from UI");

    documents_block(
        &state,
        Some(format!("{} deleted.", document.file_name)),
    )
    .await
}
