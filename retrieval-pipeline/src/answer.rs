use async_openai::{
    types::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::warn;

use common::{error::AppError, storage::store::StorageManager};

use crate::RetrievedPage;

const CONTEXT_HEADER: &str = "Below is the parsed content from the manual:\n---------------------\n";
const CONTEXT_FOOTER: &str = "\n---------------------\n";
const IMAGE_PREFIX: &str = "Here are the corresponding images per page:\n";
const QUERY_PREFIX: &str = "Given this content and without prior knowledge, answer the query:\n";

/// How much page text a source entry carries back to the caller.
const SOURCE_PREVIEW_CHARS: usize = 200;

/// One retrieved fragment as reported back to API/UI callers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QuerySource {
    pub document_id: String,
    pub file_name: String,
    pub page_number: u32,
    pub has_image: bool,
    pub text_preview: String,
    pub score: f32,
}

/// The generated answer plus the fragments it was conditioned on.
#[derive(Debug)]
pub struct QueryOutcome {
    pub answer: String,
    pub sources: Vec<QuerySource>,
}

/// Formats the retrieved pages into the context block of the prompt.
pub fn build_context(pages: &[RetrievedPage]) -> String {
    pages
        .iter()
        .map(|page| {
            format!(
                "file_name: {}\npage_number: {}\n\n{}",
                page.node.file_name, page.node.page_number, page.node.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn image_data_uri(location: &str, bytes: &[u8]) -> String {
    let mime = if location.ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    };
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Assembles the multimodal user message: context text, then the page
/// screenshots (when requested and available), then the query itself.
pub async fn build_question_content(
    storage: &StorageManager,
    pages: &[RetrievedPage],
    query: &str,
    include_images: bool,
) -> Result<Vec<ChatCompletionRequestUserMessageContentPart>, AppError> {
    let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> = Vec::new();

    parts.push(
        ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(format!(
                "{CONTEXT_HEADER}{}{CONTEXT_FOOTER}",
                build_context(pages)
            ))
            .build()?
            .into(),
    );

    if include_images {
        parts.push(
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(IMAGE_PREFIX)
                .build()?
                .into(),
        );

        for page in pages {
            let Some(location) = &page.node.image_path else {
                continue;
            };

            match storage.get(location).await {
                Ok(bytes) => {
                    parts.push(
                        ChatCompletionRequestMessageContentPartImageArgs::default()
                            .image_url(
                                ImageUrlArgs::default()
                                    .url(image_data_uri(location, &bytes))
                                    .detail(ImageDetail::High)
                                    .build()?,
                            )
                            .build()?
                            .into(),
                    );
                }
                Err(err) => {
                    // A missing screenshot degrades the prompt, not the answer
                    warn!(location = %location, error = %err, "Skipping unreadable page image");
                }
            }
        }
    }

    parts.push(
        ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(format!("{QUERY_PREFIX}{query}"))
            .build()?
            .into(),
    );

    Ok(parts)
}

/// Extracts the answer text from the chat completion.
pub fn process_llm_response(response: CreateChatCompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or(AppError::LLMParsing(
            "No content found in LLM response".into(),
        ))
}

/// Builds the per-source summaries that accompany the answer.
pub fn build_sources(pages: &[RetrievedPage]) -> Vec<QuerySource> {
    pages
        .iter()
        .map(|page| QuerySource {
            document_id: page.node.document_id.clone(),
            file_name: page.node.file_name.clone(),
            page_number: page.node.page_number,
            has_image: page.node.image_path.is_some(),
            text_preview: page.node.text_preview(SOURCE_PREVIEW_CHARS),
            score: page.score,
        })
        .collect()
}

/// Runs the full answering step over already retrieved pages.
pub async fn answer_question(
    llm_client: &Client<async_openai::config::OpenAIConfig>,
    chat_model: &str,
    storage: &StorageManager,
    pages: &[RetrievedPage],
    query: &str,
    include_images: bool,
) -> Result<QueryOutcome, AppError> {
    let content = build_question_content(storage, pages, query, include_images).await?;

    let request = CreateChatCompletionRequestArgs::default()
        .model(chat_model)
        .messages([ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?
            .into()])
        .build()?;

    let response = llm_client.chat().create(request).await?;
    let answer = process_llm_response(response)?;

    Ok(QueryOutcome {
        answer,
        sources: build_sources(pages),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use common::storage::types::page_node::PageNode;
    use common::utils::config::StorageKind;
    use object_store::memory::InMemory;
    use std::sync::Arc;

    fn retrieved_page(
        document_id: &str,
        page_number: u32,
        text: &str,
        image_path: Option<String>,
        score: f32,
    ) -> RetrievedPage {
        RetrievedPage {
            node: PageNode::new(
                document_id.to_string(),
                "manual.pdf".to_string(),
                page_number,
                text.to_string(),
                image_path,
                vec![0.1, 0.2],
            ),
            score,
        }
    }

    fn memory_storage() -> StorageManager {
        StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory)
    }

    fn count_parts(
        parts: &[ChatCompletionRequestUserMessageContentPart],
    ) -> (usize, usize) {
        let mut text = 0;
        let mut image = 0;
        for part in parts {
            match part {
                ChatCompletionRequestUserMessageContentPart::Text(_) => text += 1,
                ChatCompletionRequestUserMessageContentPart::ImageUrl(_) => image += 1,
                _ => {}
            }
        }
        (text, image)
    }

    #[test]
    fn test_build_context_includes_metadata() {
        let pages = vec![
            retrieved_page("doc_a", 1, "Mount the bracket.", None, 0.9),
            retrieved_page("doc_a", 2, "Connect the antenna.", None, 0.8),
        ];

        let context = build_context(&pages);
        assert!(context.contains("file_name: manual.pdf"));
        assert!(context.contains("page_number: 1"));
        assert!(context.contains("Mount the bracket."));
        assert!(context.contains("page_number: 2"));
    }

    #[test]
    fn test_build_sources_previews_and_flags() {
        let long_text = "x".repeat(400);
        let pages = vec![
            retrieved_page("doc_a", 1, &long_text, Some("doc_a/page_1.jpg".into()), 0.9),
            retrieved_page("doc_b", 3, "short", None, 0.5),
        ];

        let sources = build_sources(&pages);
        assert_eq!(sources.len(), 2);
        assert!(sources[0].has_image);
        assert!(sources[0].text_preview.ends_with("..."));
        assert!(sources[0].text_preview.chars().count() <= 203);
        assert!(!sources[1].has_image);
        assert_eq!(sources[1].text_preview, "short");
        assert_eq!(sources[1].page_number, 3);
    }

    #[tokio::test]
    async fn test_question_content_without_images() {
        let storage = memory_storage();
        let pages = vec![retrieved_page("doc_a", 1, "text", None, 0.9)];

        let parts = build_question_content(&storage, &pages, "how do I mount it?", false)
            .await
            .expect("content");

        // Context block plus query, nothing else
        let (text, image) = count_parts(&parts);
        assert_eq!(text, 2);
        assert_eq!(image, 0);
    }

    #[tokio::test]
    async fn test_question_content_with_images() {
        let storage = memory_storage();
        storage
            .put("doc_a/page_1.jpg", Bytes::from_static(b"jpegbytes"))
            .await
            .expect("put");

        let pages = vec![
            retrieved_page("doc_a", 1, "text", Some("doc_a/page_1.jpg".into()), 0.9),
            // Image listed in metadata but missing from the store: skipped
            retrieved_page("doc_a", 2, "text", Some("doc_a/page_2.jpg".into()), 0.8),
            retrieved_page("doc_a", 3, "text", None, 0.7),
        ];

        let parts = build_question_content(&storage, &pages, "question?", true)
            .await
            .expect("content");

        let (text, image) = count_parts(&parts);
        assert_eq!(text, 3); // context, image prefix, query
        assert_eq!(image, 1);
    }

    #[test]
    fn test_image_data_uri_mime_detection() {
        assert!(image_data_uri("doc/page_1.jpg", b"x").starts_with("data:image/jpeg;base64,"));
        assert!(image_data_uri("doc/page_1.png", b"x").starts_with("data:image/png;base64,"));
    }
}
