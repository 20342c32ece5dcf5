use axum::{extract::State, response::IntoResponse};
use futures::try_join;
use serde::Serialize;

use common::storage::types::{document::Document, ingestion_task::IngestionTask};

use crate::{
    html_state::HtmlState,
    middlewares::response_middleware::{HtmlError, TemplateResponse},
};

#[derive(Serialize)]
pub struct DocumentRow {
    pub id: String,
    pub file_name: String,
    pub page_count: u32,
    pub status: String,
    pub added_at: String,
}

#[derive(Serialize)]
pub struct TaskRow {
    pub file_name: String,
    pub state: String,
    pub attempts: u32,
    pub error_message: Option<String>,
}

#[derive(Serialize)]
struct IndexPageData {
    documents: Vec<DocumentRow>,
    active_tasks: Vec<TaskRow>,
    top_k: u8,
}

pub fn document_rows(documents: &[Document]) -> Vec<DocumentRow> {
    documents
        .iter()
        .map(|document| DocumentRow {
            id: document.id.clone(),
            file_name: document.file_name.clone(),
            page_count: document.page_count,
            status: document.status.label().to_string(),
            added_at: document.created_at.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect()
}

pub fn task_rows(tasks: &[IngestionTask]) -> Vec<TaskRow> {
    tasks
        .iter()
        .map(|task| TaskRow {
            file_name: task.payload.file_name().to_string(),
            state: task.state.display_label().to_string(),
            attempts: task.attempts,
            error_message: task.error_message.clone(),
        })
        .collect()
}

pub async fn index_handler(State(state): State<HtmlState>) -> Result<impl IntoResponse, HtmlError> {
    let (documents, active_tasks) = try_join!(
        Document::list_all(&state.db),
        IngestionTask::get_unfinished_tasks(&state.db)
    )?;

    Ok(TemplateResponse::new_template(
        "index/base.html",
        IndexPageData {
            documents: document_rows(&documents),
            active_tasks: task_rows(&active_tasks),
            top_k: state.config.similarity_top_k,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::ingestion_task::TaskPayload;

    #[test]
    fn test_document_rows_formatting() {
        let mut document = Document::new(
            "manual.pdf".into(),
            "sha".into(),
            "/data/manual.pdf".into(),
        );
        document.page_count = 12;

        let rows = document_rows(&[document]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_name, "manual.pdf");
        assert_eq!(rows[0].page_count, 12);
        assert_eq!(rows[0].status, "processing");
        // "%Y-%m-%d %H:%M" keeps the table compact
        assert_eq!(rows[0].added_at.len(), 16);
    }

    #[test]
    fn test_task_rows_use_display_labels() {
        let task = IngestionTask::new(TaskPayload::Add {
            document_id: "doc123".into(),
            pdf_path: "/data/manual.pdf".into(),
            file_name: "manual.pdf".into(),
        });

        let rows = task_rows(&[task]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_name, "manual.pdf");
        assert_eq!(rows[0].state, "Pending");
        assert_eq!(rows[0].attempts, 0);
        assert!(rows[0].error_message.is_none());
    }
}
