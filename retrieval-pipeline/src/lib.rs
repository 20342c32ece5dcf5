#![allow(clippy::missing_docs_in_private_items)]

pub mod answer;

use serde::Deserialize;
use tracing::instrument;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{page_node::PageNode, StoredObject},
    },
    utils::embedding::EmbeddingProvider,
};

/// HNSW search width. Wider than top_k so the index has room to rank.
const EF_SEARCH: usize = 40;

/// A page fragment returned by the vector database, with its similarity
/// score (1.0 is a perfect match under the cosine metric).
#[derive(Debug, Clone)]
pub struct RetrievedPage {
    pub node: PageNode,
    pub score: f32,
}

#[derive(Debug, Deserialize)]
struct PageNodeWithDistance {
    #[serde(flatten)]
    node: PageNode,
    distance: f32,
}

/// Embeds the query and asks the vector database for the nearest page
/// fragments. An empty index simply yields no results.
#[instrument(skip_all, fields(top_k))]
pub async fn retrieve_pages(
    db: &SurrealDbClient,
    embedding_provider: &EmbeddingProvider,
    query_text: &str,
    top_k: u8,
) -> Result<Vec<RetrievedPage>, AppError> {
    let embedding = embedding_provider.embed(query_text).await?;
    retrieve_pages_with_embedding(db, embedding, top_k).await
}

/// KNN lookup with an already computed query embedding. Split out so tests
/// can drive retrieval with fixed vectors.
pub async fn retrieve_pages_with_embedding(
    db: &SurrealDbClient,
    embedding: Vec<f32>,
    top_k: u8,
) -> Result<Vec<RetrievedPage>, AppError> {
    let query = format!(
        "SELECT *, vector::distance::knn() AS distance FROM {} \
         WHERE embedding <|{},{}|> $embedding ORDER BY distance ASC",
        PageNode::table_name(),
        top_k.max(1),
        EF_SEARCH
    );

    let rows: Vec<PageNodeWithDistance> = db
        .client
        .query(query)
        .bind(("embedding", embedding))
        .await?
        .take(0)?;

    Ok(rows
        .into_iter()
        .map(|row| RetrievedPage {
            score: (1.0 - row.distance).max(0.0),
            node: row.node,
        })
        .collect())
}
