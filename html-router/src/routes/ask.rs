use axum::{extract::State, response::IntoResponse, Form};
use serde::{Deserialize, Serialize};
use tracing::info;

use retrieval_pipeline::answer::answer_question;

use crate::{
    html_state::HtmlState,
    middlewares::response_middleware::{HtmlError, TemplateResponse},
};

#[derive(Deserialize)]
pub struct AskForm {
    pub question: String,
    #[serde(default)]
    pub include_images: Option<String>,
}

#[derive(Serialize)]
pub struct SourceRow {
    pub document_id: String,
    pub file_name: String,
    pub page_number: u32,
    pub has_image: bool,
    pub score: f32,
}

#[derive(Serialize, Default)]
struct AnswerData {
    question: String,
    answer: Option<String>,
    sources: Vec<SourceRow>,
    notice: Option<String>,
}

fn answer_block(data: AnswerData) -> TemplateResponse {
    TemplateResponse::new_partial("index/base.html", "answer_block", data)
}

/// Runs a question through retrieval and answering, rendering the answer
/// block the ask form swaps in.
pub async fn ask_handler(
    State(state): State<HtmlState>,
    Form(form): Form<AskForm>,
) -> Result<impl IntoResponse, HtmlError> {
    let question = form.question.trim().to_string();
    if question.is_empty() {
        return Ok(answer_block(AnswerData {
            notice: Some("Please enter a question.".to_string()),
            ..AnswerData::default()
        }));
    }

    // Checkbox arrives as "on" when ticked, absent otherwise
    let include_images = form.include_images.is_some();

    let pages = retrieval_pipeline::retrieve_pages(
        &state.db,
        &state.embedding_provider,
        &question,
        state.config.similarity_top_k,
    )
    .await?;

    if pages.is_empty() {
        return Ok(answer_block(AnswerData {
            question,
            notice: Some("No relevant pages found. Upload a manual first.".to_string()),
            ..AnswerData::default()
        }));
    }

    let outcome = answer_question(
        &state.llm_client,
        state.config.chat_model(),
        &state.storage,
        &pages,
        &question,
        include_images,
    )
    .await?;

    info!(sources = outcome.sources.len(), "Question answered");

    let sources = outcome
        .sources
        .iter()
        .map(|source| SourceRow {
            document_id: source.document_id.clone(),
            file_name: source.file_name.clone(),
            page_number: source.page_number,
            has_image: source.has_image,
            score: source.score,
        })
        .collect();

    Ok(answer_block(AnswerData {
        question,
        answer: Some(outcome.answer),
        sources,
        notice: None,
    }))
}
