use std::{str::FromStr, sync::Arc};

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::AppError, storage::types::index_struct::EmbeddingSignature, utils::config::AppConfig,
};

const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAI,
    #[default]
    FastEmbed,
    /// Feature-hashed bag of words. Needs no model; used by tests and offline setups.
    Hashed,
}

/// Turns node and query text into vectors. Every vector it returns has
/// exactly `dimension()` components, so a namespace built with one signature
/// never mixes widths.
#[derive(Clone)]
pub struct EmbeddingProvider {
    backend: Backend,
    dimension: usize,
}

#[derive(Clone)]
enum Backend {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: EmbeddingModel,
    },
    Hashed,
}

impl EmbeddingProvider {
    /// Builds the provider selected by `embedding_backend`. The OpenAI backend
    /// reuses the supplied client; the other two never touch the network at
    /// query time.
    pub async fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        match config.embedding_backend {
            EmbeddingBackend::OpenAI => {
                let client = openai_client.ok_or_else(|| {
                    AppError::Configuration(
                        "the openai embedding backend requires an OpenAI client".into(),
                    )
                })?;
                let model = config
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
                Ok(Self::new_openai(client, model, config.embedding_dimensions))
            }
            EmbeddingBackend::FastEmbed => Self::new_fastembed(config.embedding_model.as_deref()).await,
            EmbeddingBackend::Hashed => Self::new_hashed(config.embedding_dimensions as usize),
        }
    }

    pub fn new_openai(client: Arc<Client<OpenAIConfig>>, model: String, dimensions: u32) -> Self {
        Self {
            backend: Backend::OpenAI { client, model },
            dimension: dimensions as usize,
        }
    }

    /// Loads a local FastEmbed model on a blocking thread. The first run may
    /// download the model files.
    pub async fn new_fastembed(model_code: Option<&str>) -> Result<Self, AppError> {
        let model_name = match model_code {
            Some(code) => EmbeddingModel::from_str(code).map_err(|err| {
                AppError::Configuration(format!("unknown FastEmbed model '{code}': {err}"))
            })?,
            None => EmbeddingModel::default(),
        };

        let dimension = EmbeddingModel::get_model_info(&model_name)
            .map(|info| info.dim)
            .ok_or_else(|| {
                AppError::Configuration(format!("no FastEmbed metadata for {model_name}"))
            })?;

        let options = TextInitOptions::new(model_name.clone()).with_show_download_progress(true);
        let model = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options))
            .await?
            .map_err(|err| {
                AppError::Configuration(format!("failed to load FastEmbed model: {err}"))
            })?;

        Ok(Self {
            backend: Backend::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                model_name,
            },
            dimension,
        })
    }

    pub fn new_hashed(dimension: usize) -> Result<Self, AppError> {
        if dimension == 0 {
            return Err(AppError::Configuration(
                "hashed embeddings need at least one dimension".into(),
            ));
        }
        Ok(Self {
            backend: Backend::Hashed,
            dimension,
        })
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            Backend::OpenAI { .. } => "openai",
            Backend::FastEmbed { .. } => "fastembed",
            Backend::Hashed => "hashed",
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_code(&self) -> Option<String> {
        match &self.backend {
            Backend::OpenAI { model, .. } => Some(model.clone()),
            Backend::FastEmbed { model_name, .. } => Some(model_name.to_string()),
            Backend::Hashed => None,
        }
    }

    /// What a namespace built by this provider records in its index structure.
    pub fn signature(&self) -> Result<EmbeddingSignature, AppError> {
        let dimension = u32::try_from(self.dimension).map_err(|_| {
            AppError::Configuration("embedding dimension does not fit in 32 bits".into())
        })?;

        Ok(EmbeddingSignature {
            backend: self.backend_label().to_string(),
            model: self.model_code(),
            dimension,
        })
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        self.embed_batch(vec![text.to_owned()])
            .await?
            .pop()
            .ok_or_else(|| AppError::Inference("embedding backend returned no vector".into()))
    }

    /// One vector per input, in input order. Backend failures and vectors of
    /// the wrong width are `Inference` errors.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        let vectors = match &self.backend {
            Backend::Hashed => texts
                .iter()
                .map(|text| hashed_embedding(text, self.dimension))
                .collect(),
            Backend::FastEmbed { model, .. } => {
                let mut guard = Arc::clone(model).lock_owned().await;
                tokio::task::spawn_blocking(move || guard.embed(texts, None))
                    .await?
                    .map_err(|err| AppError::Inference(format!("fastembed failed: {err}")))?
            }
            Backend::OpenAI { client, model } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .dimensions(u32::try_from(self.dimension).unwrap_or(u32::MAX))
                    .build()?;

                let mut response = client.embeddings().create(request).await.map_err(|err| {
                    AppError::Inference(format!("OpenAI embedding request failed: {err}"))
                })?;
                response.data.sort_by_key(|item| item.index);
                response.data.into_iter().map(|item| item.embedding).collect()
            }
        };

        self.checked(vectors, expected)
    }

    fn checked(&self, vectors: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>, AppError> {
        if vectors.len() != expected {
            return Err(AppError::Inference(format!(
                "{} backend returned {} vectors for {expected} inputs",
                self.backend_label(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(AppError::Inference(format!(
                "{} backend returned a {}-dimensional vector, expected {}",
                self.backend_label(),
                bad.len(),
                self.dimension
            )));
        }

        debug!(
            backend = self.backend_label(),
            count = vectors.len(),
            "embedded batch"
        );
        Ok(vectors)
    }
}

/// Signed feature hashing over lowercased ASCII words, L2-normalised.
/// Buckets come from SHA-256 so stored vectors stay valid across builds.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];

    let words = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty());
    for word in words {
        let digest = Sha256::digest(word.to_ascii_lowercase().as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        if let Some(slot) = vector.get_mut(bucket) {
            *slot += sign;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}
