use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};

use common::{error::AppError, storage::types::page_node::PageNode};

use crate::{api_state::ApiState, error::ApiError};

/// Serves the stored screenshot for one page of a document.
pub async fn get_page_image(
    State(state): State<ApiState>,
    Path((document_id, page_number)): Path<(String, u32)>,
) -> Result<impl IntoResponse, ApiError> {
    let page = PageNode::find_page(&document_id, page_number, &state.db)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "Page {page_number} not found in document {document_id}"
            ))
        })?;

    let location = page.image_path.ok_or_else(|| {
        ApiError::NotFound(format!(
            "No image stored for page {page_number} of document {document_id}"
        ))
    })?;

    let bytes = match state.storage.get(&location).await {
        Ok(bytes) => bytes,
        Err(object_store::Error::NotFound { .. }) => {
            return Err(ApiError::NotFound(format!(
                "Image missing from storage for page {page_number} of document {document_id}"
            )));
        }
        Err(err) => return Err(ApiError::from(AppError::Storage(err))),
    };

    let mime_type = mime_guess::from_path(&location)
        .first_or(mime::IMAGE_JPEG)
        .to_string();

    Ok(([(header::CONTENT_TYPE, mime_type)], bytes))
}
