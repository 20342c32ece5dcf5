use common::storage::{db::SurrealDbClient, store::StorageManager};
use common::utils::embedding::EmbeddingProvider;
use common::utils::template_engine::{ProvidesTemplateEngine, TemplateEngine};
use common::{create_template_engine, utils::config::AppConfig};
use std::sync::Arc;
use tracing::debug;

use crate::OpenAIClientType;

#[derive(Clone)]
pub struct HtmlState {
    pub db: Arc<SurrealDbClient>,
    pub llm_client: Arc<OpenAIClientType>,
    pub templates: Arc<TemplateEngine>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub embedding_provider: Arc<EmbeddingProvider>,
}

impl HtmlState {
    pub fn new_with_resources(
        db: Arc<SurrealDbClient>,
        llm_client: Arc<OpenAIClientType>,
        storage: StorageManager,
        config: AppConfig,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Self {
        let templates = Arc::new(create_template_engine!("templates"));
        debug!("Template engine configured for html_router.");

        Self {
            db,
            llm_client,
            templates,
            config,
            storage,
            embedding_provider,
        }
    }
}

impl ProvidesTemplateEngine for HtmlState {
    fn template_engine(&self) -> &Arc<TemplateEngine> {
        &self.templates
    }
}
