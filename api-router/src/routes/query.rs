use std::time::Instant;

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use retrieval_pipeline::answer::{answer_question, QuerySource};

use crate::{api_state::ApiState, error::ApiError};

const MAX_TOP_K: u8 = 20;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub similarity_top_k: Option<u8>,
    #[serde(default = "default_include_images")]
    pub include_images: bool,
}

fn default_include_images() -> bool {
    true
}

#[derive(Serialize)]
pub struct QueryResponse {
    query: String,
    answer: String,
    sources: Vec<QuerySource>,
    processing_time: f64,
}

/// Answers a question against the indexed manuals: retrieve the nearest
/// pages, hand them (text plus screenshots) to the LLM, return the answer
/// with its sources.
pub async fn query_documents(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let started = Instant::now();

    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(ApiError::ValidationError("Query must not be empty".into()));
    }

    let top_k = request
        .similarity_top_k
        .unwrap_or(state.config.similarity_top_k);
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(ApiError::ValidationError(format!(
            "similarity_top_k must be between 1 and {MAX_TOP_K}"
        )));
    }

    let pages =
        retrieval_pipeline::retrieve_pages(&state.db, &state.embedding_provider, &query, top_k)
            .await?;

    if pages.is_empty() {
        return Err(ApiError::NotFound(
            "No relevant documents found for the query".into(),
        ));
    }

    let outcome = answer_question(
        &state.llm_client,
        state.config.chat_model(),
        &state.storage,
        &pages,
        &query,
        request.include_images,
    )
    .await?;

    let processing_time = started.elapsed().as_secs_f64();
    info!(
        retrieved = outcome.sources.len(),
        processing_time, "Query answered"
    );

    Ok(Json(QueryResponse {
        query,
        answer: outcome.answer,
        sources: outcome.sources,
        processing_time,
    }))
}
