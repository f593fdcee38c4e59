use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    /// Characters of document text kept as the listing preview
    pub preview_chars: usize,
    /// Nodes sent to the embedding provider per request
    pub embedding_batch_size: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            preview_chars: 200,
            embedding_batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning {
                preview_chars: config.preview_chars,
                ..IngestionTuning::default()
            },
        }
    }
}
