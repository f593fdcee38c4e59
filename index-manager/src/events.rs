use common::error::{AppError, ErrorKind};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// One item of a streamed answer. `End` and `Error` are sentinels: a stream
/// carries exactly one of them, as its last item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Chunk { text: String },
    End,
    Error { kind: ErrorKind, message: String },
}

impl StreamEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { text: text.into() }
    }

    pub fn from_error(err: &AppError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.detail(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }

    /// The error carried by an `Error` sentinel.
    pub fn into_error(self) -> Option<AppError> {
        match self {
            Self::Error { kind, message } => Some(AppError::from_remote(kind, message)),
            _ => None,
        }
    }
}

pub type AnswerStream = BoxStream<'static, StreamEvent>;
