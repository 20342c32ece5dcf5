use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(PageNode, "page_node", {
    document_id: String,
    file_name: String,
    page_number: u32,
    text: String,
    image_path: Option<String>,
    embedding: Vec<f32>
});

impl PageNode {
    pub fn new(
        document_id: String,
        file_name: String,
        page_number: u32,
        text: String,
        image_path: Option<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            file_name,
            page_number,
            text,
            image_path,
            embedding,
        }
    }

    /// Short preview of the page text for listings and query responses.
    pub fn text_preview(&self, max_chars: usize) -> String {
        if self.text.chars().count() <= max_chars {
            self.text.clone()
        } else {
            let truncated: String = self.text.chars().take(max_chars).collect();
            format!("{truncated}...")
        }
    }

    /// All pages of a document, in page order.
    pub async fn get_by_document_id(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let pages: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE document_id = $document_id
                 ORDER BY page_number ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;

        Ok(pages)
    }

    pub async fn find_page(
        document_id: &str,
        page_number: u32,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE document_id = $document_id AND page_number = $page_number",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .bind(("page_number", page_number))
            .await?;

        let pages: Vec<Self> = response.take(0)?;
        Ok(pages.into_iter().next())
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query("DELETE type::table($table) WHERE document_id = $document_id")
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_page(document_id: &str, page_number: u32, text: &str) -> PageNode {
        PageNode::new(
            document_id.to_string(),
            "manual.pdf".to_string(),
            page_number,
            text.to_string(),
            Some(format!("{document_id}/page_{page_number}.jpg")),
            vec![0.1, 0.2, 0.3],
        )
    }

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_page_node_creation() {
        let page = sample_page("doc123", 7, "Connect the antenna to port A.");

        assert_eq!(page.document_id, "doc123");
        assert_eq!(page.page_number, 7);
        assert_eq!(page.file_name, "manual.pdf");
        assert_eq!(page.image_path.as_deref(), Some("doc123/page_7.jpg"));
        assert!(!page.id.is_empty());
    }

    #[test]
    fn test_text_preview_truncation() {
        let page = sample_page("doc123", 1, "short text");
        assert_eq!(page.text_preview(100), "short text");

        let long = "a".repeat(250);
        let page = sample_page("doc123", 1, &long);
        let preview = page.text_preview(200);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 203);
    }

    #[tokio::test]
    async fn test_get_by_document_id_ordering() {
        let db = memory_db().await;

        // Insert out of order
        for page_number in [3, 1, 2] {
            db.store_item(sample_page("doc123", page_number, "text"))
                .await
                .expect("store");
        }
        db.store_item(sample_page("other_doc", 1, "text"))
            .await
            .expect("store");

        let pages = PageNode::get_by_document_id("doc123", &db)
            .await
            .expect("fetch");

        assert_eq!(pages.len(), 3);
        let numbers: Vec<u32> = pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_find_page() {
        let db = memory_db().await;
        let stored = sample_page("doc123", 5, "page five");
        db.store_item(stored.clone()).await.expect("store");

        let found = PageNode::find_page("doc123", 5, &db).await.expect("find");
        assert_eq!(found.map(|p| p.id), Some(stored.id));

        let missing = PageNode::find_page("doc123", 6, &db).await.expect("find");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete_by_document_id() {
        let db = memory_db().await;
        db.store_item(sample_page("doc123", 1, "one"))
            .await
            .expect("store");
        db.store_item(sample_page("doc123", 2, "two"))
            .await
            .expect("store");
        let kept = sample_page("other_doc", 1, "kept");
        db.store_item(kept.clone()).await.expect("store");

        PageNode::delete_by_document_id("doc123", &db)
            .await
            .expect("delete");

        let deleted = PageNode::get_by_document_id("doc123", &db)
            .await
            .expect("fetch");
        assert!(deleted.is_empty());

        let remaining = PageNode::get_by_document_id("other_doc", &db)
            .await
            .expect("fetch");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, kept.id);
    }

    #[tokio::test]
    async fn test_delete_by_nonexistent_document_id() {
        let db = memory_db().await;
        db.store_item(sample_page("doc123", 1, "kept"))
            .await
            .expect("store");

        PageNode::delete_by_document_id("missing", &db)
            .await
            .expect("delete of unknown document id should not fail");

        let remaining = PageNode::get_by_document_id("doc123", &db)
            .await
            .expect("fetch");
        assert_eq!(remaining.len(), 1);
    }
}
