use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::{error::AppError, utils::embedding::EmbeddingBackend};

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_query_model")]
    pub query_model: String,
    #[serde(default = "default_query_system_prompt")]
    pub query_system_prompt: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_chunk_min_chars")]
    pub chunk_min_chars: usize,
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,
    #[serde(default)]
    pub chunk_overlap_chars: usize,
    #[serde(default = "default_gateway_address")]
    pub gateway_address: String,
    #[serde(default)]
    pub gateway_secret: String,
    #[serde(default = "default_gateway_connect_attempts")]
    pub gateway_connect_attempts: usize,
    #[serde(default = "default_gateway_retry_interval_secs")]
    pub gateway_retry_interval_secs: u64,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_reconcile_grace_secs")]
    pub reconcile_grace_secs: u64,
    #[serde(default = "default_upload_max_bytes")]
    pub upload_max_bytes: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_query_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_query_system_prompt() -> String {
    "You answer questions about the user's uploaded documents. Use only the supplied \
     context. If the context does not contain the answer, say that you do not know."
        .to_string()
}

fn default_http_port() -> u16 {
    5601
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_similarity_top_k() -> usize {
    1
}

fn default_query_timeout_secs() -> u64 {
    60
}

fn default_preview_chars() -> usize {
    200
}

fn default_chunk_min_chars() -> usize {
    512
}

fn default_chunk_max_chars() -> usize {
    2_048
}

fn default_gateway_address() -> String {
    "127.0.0.1:5602".to_string()
}

fn default_gateway_connect_attempts() -> usize {
    10
}

fn default_gateway_retry_interval_secs() -> u64 {
    3
}

fn default_upload_dir() -> String {
    "./documents".to_string()
}

fn default_reconcile_grace_secs() -> u64 {
    300
}

fn default_upload_max_bytes() -> usize {
    50_000_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            query_model: default_query_model(),
            query_system_prompt: default_query_system_prompt(),
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "docquery".to_string(),
            surrealdb_database: "docquery".to_string(),
            http_port: default_http_port(),
            embedding_backend: EmbeddingBackend::default(),
            embedding_model: None,
            embedding_dimensions: default_embedding_dimensions(),
            similarity_top_k: default_similarity_top_k(),
            query_timeout_secs: default_query_timeout_secs(),
            preview_chars: default_preview_chars(),
            chunk_min_chars: default_chunk_min_chars(),
            chunk_max_chars: default_chunk_max_chars(),
            chunk_overlap_chars: 0,
            gateway_address: default_gateway_address(),
            gateway_secret: String::new(),
            gateway_connect_attempts: default_gateway_connect_attempts(),
            gateway_retry_interval_secs: default_gateway_retry_interval_secs(),
            upload_dir: default_upload_dir(),
            reconcile_grace_secs: default_reconcile_grace_secs(),
            upload_max_bytes: default_upload_max_bytes(),
        }
    }
}

impl AppConfig {
    /// Checks the settings every index-hosting process needs before it can
    /// answer queries.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.openai_api_key.trim().is_empty() {
            return Err(AppError::Configuration(
                "openai_api_key must be set for answer synthesis".into(),
            ));
        }
        if self.similarity_top_k == 0 {
            return Err(AppError::Configuration(
                "similarity_top_k must be at least 1".into(),
            ));
        }
        if self.chunk_min_chars == 0 || self.chunk_min_chars > self.chunk_max_chars {
            return Err(AppError::Configuration(
                "invalid chunk bounds; ensure 0 < chunk_min_chars <= chunk_max_chars".into(),
            ));
        }
        Ok(())
    }

    /// Checks the settings shared by both ends of the gateway.
    pub fn validate_gateway(&self) -> Result<(), AppError> {
        if self.gateway_secret.is_empty() {
            return Err(AppError::Configuration(
                "gateway_secret must be set when running split-process".into(),
            ));
        }
        if self.gateway_connect_attempts == 0 {
            return Err(AppError::Configuration(
                "gateway_connect_attempts must be at least 1".into(),
            ));
        }
        Ok(())
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

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.similarity_top_k, 1);
        assert_eq!(config.preview_chars, 200);
        assert_eq!(config.gateway_connect_attempts, 10);
        assert_eq!(config.gateway_retry_interval_secs, 3);
        assert_eq!(config.gateway_address, "127.0.0.1:5602");
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = AppConfig::default();
        assert!(matches!(
            config.validate(),
            Err(AppError::Configuration(_))
        ));

        let config = AppConfig {
            openai_api_key: "sk-test".into(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_chunk_bounds() {
        let config = AppConfig {
            openai_api_key: "sk-test".into(),
            chunk_min_chars: 4_000,
            chunk_max_chars: 100,
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_gateway_requires_secret() {
        let config = AppConfig::default();
        assert!(matches!(
            config.validate_gateway(),
            Err(AppError::Configuration(_))
        ));

        let config = AppConfig {
            gateway_secret: "password".into(),
            ..AppConfig::default()
        };
        assert!(config.validate_gateway().is_ok());
    }
}
