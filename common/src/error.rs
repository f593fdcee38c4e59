use std::{fmt, time::Duration};

use async_openai::error::OpenAIError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinError;

/// The three backing stores an index is composed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Content,
    IndexStructure,
    Vector,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StoreKind::Content => "content",
            StoreKind::IndexStructure => "index structure",
            StoreKind::Vector => "vector",
        };
        f.write_str(label)
    }
}

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Load error: {0}")]
    Load(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Failed to write to the {store} store: {message}")]
    StoreWrite { store: StoreKind, message: String },
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Namespace '{0}' has no indexed content")]
    EmptyIndex(String),
    #[error("Inference error: {0}")]
    Inference(String),
    #[error("Inference timed out after {}s", .0.as_secs())]
    InferenceTimeout(Duration),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

/// Serializable classification of an [`AppError`], used wherever an error has to
/// cross a channel or process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Load,
    Parse,
    StoreWrite(StoreKind),
    StoreUnavailable,
    EmptyIndex,
    Inference,
    InferenceTimeout { secs: u64 },
    Configuration,
    GatewayUnavailable,
    Protocol,
    NotFound,
    Validation,
    Internal,
}

impl AppError {
    pub fn store_write(store: StoreKind, err: impl fmt::Display) -> Self {
        Self::StoreWrite {
            store,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Load(_) => ErrorKind::Load,
            Self::Parse(_) => ErrorKind::Parse,
            Self::StoreWrite { store, .. } => ErrorKind::StoreWrite(*store),
            Self::StoreUnavailable(_) | Self::Database(_) => ErrorKind::StoreUnavailable,
            Self::EmptyIndex(_) => ErrorKind::EmptyIndex,
            Self::Inference(_) | Self::OpenAI(_) => ErrorKind::Inference,
            Self::InferenceTimeout(after) => ErrorKind::InferenceTimeout {
                secs: after.as_secs(),
            },
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::GatewayUnavailable(_) => ErrorKind::GatewayUnavailable,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Join(_) | Self::Io(_) | Self::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// The error's payload without the variant prefix, so that
    /// `from_remote(err.kind(), err.detail())` displays like `err`.
    pub fn detail(&self) -> String {
        match self {
            Self::Load(msg)
            | Self::Parse(msg)
            | Self::StoreUnavailable(msg)
            | Self::EmptyIndex(msg)
            | Self::Inference(msg)
            | Self::Configuration(msg)
            | Self::GatewayUnavailable(msg)
            | Self::Protocol(msg)
            | Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::InternalError(msg) => msg.clone(),
            Self::StoreWrite { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuilds an error that was flattened to `(kind, detail)` on the other
    /// side of a channel or socket.
    pub fn from_remote(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Load => Self::Load(message),
            ErrorKind::Parse => Self::Parse(message),
            ErrorKind::StoreWrite(store) => Self::StoreWrite { store, message },
            ErrorKind::StoreUnavailable => Self::StoreUnavailable(message),
            ErrorKind::EmptyIndex => Self::EmptyIndex(message),
            ErrorKind::Inference => Self::Inference(message),
            ErrorKind::InferenceTimeout { secs } => {
                Self::InferenceTimeout(Duration::from_secs(secs))
            }
            ErrorKind::Configuration => Self::Configuration(message),
            ErrorKind::GatewayUnavailable => Self::GatewayUnavailable(message),
            ErrorKind::Protocol => Self::Protocol(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Validation => Self::Validation(message),
            ErrorKind::Internal => Self::InternalError(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_keep_their_store() {
        let err = AppError::store_write(StoreKind::Vector, "disk full");
        assert_eq!(err.kind(), ErrorKind::StoreWrite(StoreKind::Vector));
        assert_eq!(
            err.to_string(),
            "Failed to write to the vector store: disk full"
        );
    }

    #[test]
    fn test_remote_round_trip_preserves_kind() {
        let original = AppError::EmptyIndex("tenant-a".into());
        let rebuilt = AppError::from_remote(original.kind(), original.detail());
        assert!(matches!(rebuilt, AppError::EmptyIndex(ref ns) if ns == "tenant-a"));
        assert_eq!(rebuilt.to_string(), original.to_string());

        let write = AppError::store_write(StoreKind::Content, "conflict");
        let rebuilt = AppError::from_remote(write.kind(), write.detail());
        assert_eq!(rebuilt.to_string(), write.to_string());

        let io = AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_timeout_message_mentions_seconds() {
        let err = AppError::InferenceTimeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "Inference timed out after 5s");
        assert_eq!(err.kind(), ErrorKind::InferenceTimeout { secs: 5 });
        let rebuilt = AppError::from_remote(err.kind(), err.detail());
        assert_eq!(rebuilt.to_string(), err.to_string());
    }
}
