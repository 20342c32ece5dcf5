use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};

pub type OpenAIClientType = async_openai::Client<async_openai::config::OpenAIConfig>;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub llm_client: Arc<OpenAIClientType>,
    pub embedding_provider: Arc<EmbeddingProvider>,
}

impl ApiState {
    pub async fn new(
        config: &AppConfig,
        storage: StorageManager,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        db.ensure_initialized(config.embedding_dimensions as usize)
            .await?;

        Ok(Self::with_resources(
            db,
            config,
            storage,
            Arc::new(async_openai::Client::with_config(
                config.llm_client_config(),
            )),
            Arc::new(EmbeddingProvider::from_config(config)),
        ))
    }

    /// Assembles a state from already constructed resources (the combined
    /// binary and tests share connections this way).
    pub fn with_resources(
        db: Arc<SurrealDbClient>,
        config: &AppConfig,
        storage: StorageManager,
        llm_client: Arc<OpenAIClientType>,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Self {
        Self {
            db,
            config: config.clone(),
            storage,
            llm_client,
            embedding_provider,
        }
    }
}
