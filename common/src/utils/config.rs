use async_openai::config::OpenAIConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::info;

/// LLM provider driving answer generation. Both are reached through the
/// OpenAI-compatible chat API; Gemini via its compatibility endpoint.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Gemini,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    // Cloud parsing service
    pub parse_api_key: String,
    #[serde(default = "default_parse_region")]
    pub parse_region: String,
    #[serde(default)]
    pub parse_base_url: Option<String>,
    #[serde(default = "default_parse_model")]
    pub parse_model: String,
    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,
    #[serde(default = "default_true")]
    pub parse_high_res_ocr: bool,
    #[serde(default = "default_true")]
    pub parse_table_extraction: bool,
    #[serde(default = "default_true")]
    pub parse_tables_as_html: bool,
    #[serde(default = "default_poll_interval")]
    pub parse_poll_interval_secs: u64,
    #[serde(default = "default_parse_timeout")]
    pub parse_timeout_secs: u64,

    // Answer generation
    #[serde(default = "default_llm_provider")]
    pub llm_provider: LlmProvider,
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_openai_chat_model")]
    pub openai_chat_model: String,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,
    #[serde(default = "default_gemini_chat_model")]
    pub gemini_chat_model: String,

    // Embeddings always go through the OpenAI API, regardless of provider
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,

    // Vector database (embedded engine or managed remote)
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,

    // Paths and server
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
    pub http_port: u16,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_upload_max_body_bytes")]
    pub upload_max_body_bytes: usize,
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: u8,
}

fn default_parse_region() -> String {
    "na".to_string()
}

fn default_parse_model() -> String {
    "openai-gpt-4-1-mini".to_string()
}

fn default_parse_mode() -> String {
    "parse_page_with_agent".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    2
}

fn default_parse_timeout() -> u64 {
    600
}

fn default_llm_provider() -> LlmProvider {
    LlmProvider::Gemini
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_gemini_chat_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_image_dir() -> String {
    "./data/images".to_string()
}

fn default_upload_max_body_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_similarity_top_k() -> u8 {
    3
}

impl AppConfig {
    /// Base URL of the cloud parsing service, derived from the region
    /// unless overridden. Unknown regions fall back to the NA endpoint.
    pub fn parse_base_url(&self) -> String {
        if let Some(url) = &self.parse_base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.parse_region.to_ascii_lowercase().as_str() {
            "eu" => "https://api.cloud.eu.llamaindex.ai".to_string(),
            _ => "https://api.cloud.llamaindex.ai".to_string(),
        }
    }

    /// Chat model for the selected provider.
    pub fn chat_model(&self) -> &str {
        match self.llm_provider {
            LlmProvider::OpenAI => &self.openai_chat_model,
            LlmProvider::Gemini => &self.gemini_chat_model,
        }
    }

    /// Client configuration for answer generation, per provider.
    pub fn llm_client_config(&self) -> OpenAIConfig {
        match self.llm_provider {
            LlmProvider::OpenAI => OpenAIConfig::new()
                .with_api_key(&self.openai_api_key)
                .with_api_base(&self.openai_base_url),
            LlmProvider::Gemini => OpenAIConfig::new()
                .with_api_key(self.gemini_api_key.clone().unwrap_or_default())
                .with_api_base(&self.gemini_base_url),
        }
    }

    /// Client configuration for embedding generation. Always OpenAI.
    pub fn embedding_client_config(&self) -> OpenAIConfig {
        OpenAIConfig::new()
            .with_api_key(&self.openai_api_key)
            .with_api_base(&self.openai_base_url)
    }

    /// Validates that required keys are present for the selected provider.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.parse_api_key.trim().is_empty() {
            errors.push("parse_api_key is required");
        }

        // The OpenAI key is always needed: embeddings go through OpenAI
        // even when Gemini generates the answers.
        if self.openai_api_key.trim().is_empty() {
            errors.push("openai_api_key is required for embeddings");
        }

        if self.llm_provider == LlmProvider::Gemini
            && self
                .gemini_api_key
                .as_deref()
                .is_none_or(|key| key.trim().is_empty())
        {
            errors.push("gemini_api_key is required when llm_provider is gemini");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Message(format!(
                "Configuration errors: {}",
                errors.join("; ")
            )))
        }
    }

    /// Logs a startup summary of the effective configuration.
    pub fn log_summary(&self) {
        info!(
            parse_model = %self.parse_model,
            parse_mode = %self.parse_mode,
            region = %self.parse_region,
            base_url = %self.parse_base_url(),
            high_res_ocr = self.parse_high_res_ocr,
            table_extraction = self.parse_table_extraction,
            "Parse service configured"
        );
        info!(
            provider = ?self.llm_provider,
            chat_model = %self.chat_model(),
            embedding_model = %self.embedding_model,
            embedding_dimensions = self.embedding_dimensions,
            similarity_top_k = self.similarity_top_k,
            "Answer generation configured"
        );
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            parse_api_key: "llx-test".into(),
            parse_region: "na".into(),
            parse_base_url: None,
            parse_model: default_parse_model(),
            parse_mode: default_parse_mode(),
            parse_high_res_ocr: true,
            parse_table_extraction: true,
            parse_tables_as_html: true,
            parse_poll_interval_secs: 2,
            parse_timeout_secs: 600,
            llm_provider: LlmProvider::OpenAI,
            openai_api_key: "sk-test".into(),
            openai_base_url: default_openai_base_url(),
            openai_chat_model: default_openai_chat_model(),
            gemini_api_key: None,
            gemini_base_url: default_gemini_base_url(),
            gemini_chat_model: default_gemini_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: 1536,
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "test".into(),
            surrealdb_database: "test".into(),
            data_dir: "./data".into(),
            image_dir: "./data/images".into(),
            http_port: 0,
            storage: StorageKind::Memory,
            upload_max_body_bytes: default_upload_max_body_bytes(),
            similarity_top_k: 3,
        }
    }

    #[test]
    fn test_validate_accepts_openai_provider() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_gemini_key_for_gemini() {
        let mut config = base_config();
        config.llm_provider = LlmProvider::Gemini;
        assert!(config.validate().is_err());

        config.gemini_api_key = Some("AIza-test".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_always_requires_openai_key() {
        let mut config = base_config();
        config.llm_provider = LlmProvider::Gemini;
        config.gemini_api_key = Some("AIza-test".into());
        config.openai_api_key = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_base_url_region_mapping() {
        let mut config = base_config();
        assert_eq!(config.parse_base_url(), "https://api.cloud.llamaindex.ai");

        config.parse_region = "eu".into();
        assert_eq!(
            config.parse_base_url(),
            "https://api.cloud.eu.llamaindex.ai"
        );

        // Unknown regions fall back to the NA endpoint
        config.parse_region = "apac".into();
        assert_eq!(config.parse_base_url(), "https://api.cloud.llamaindex.ai");

        config.parse_base_url = Some("http://localhost:9000/".into());
        assert_eq!(config.parse_base_url(), "http://localhost:9000");
    }

    #[test]
    fn test_chat_model_follows_provider() {
        let mut config = base_config();
        assert_eq!(config.chat_model(), "gpt-4o-mini");
        config.llm_provider = LlmProvider::Gemini;
        assert_eq!(config.chat_model(), "gemini-2.5-flash");
    }
}
