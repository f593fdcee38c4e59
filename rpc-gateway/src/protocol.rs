use std::{fmt, path::PathBuf};

use common::error::{AppError, ErrorKind};
use index_manager::{DocumentListing, IndexSummary, StreamEvent};
use retrieval_pipeline::Answer;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Handle to a value parked on the server until the client fetches it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyId(String);

/// Handle to a running streamed query on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl ProxyId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl StreamId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages exchanged before any request is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Handshake {
    Challenge { nonce: String },
    Answer { digest: String },
    Accepted,
    Rejected,
}

/// One request or response on the wire. Responses echo the id of the request
/// they answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame<T> {
    pub id: u64,
    pub body: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Activate { namespace: String },
    Insert { path: PathBuf, doc_id: Option<String> },
    Query { text: String, namespace: String },
    ListDocuments,
    StartStream { text: String, namespace: String },
    NextEvent { stream: StreamId },
    CancelStream { stream: StreamId },
    Fetch { proxy: ProxyId },
    Release { proxy: ProxyId },
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::Activate { .. } => "activate",
            Request::Insert { .. } => "insert",
            Request::Query { .. } => "query",
            Request::ListDocuments => "list_documents",
            Request::StartStream { .. } => "start_stream",
            Request::NextEvent { .. } => "next_event",
            Request::CancelStream { .. } => "cancel_stream",
            Request::Fetch { .. } => "fetch",
            Request::Release { .. } => "release",
        }
    }
}

/// A value held behind a [`ProxyId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ProxyValue {
    Answer(Answer),
    Documents(Vec<DocumentListing>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Activated { summary: IndexSummary },
    Inserted { doc_id: String },
    Proxy { proxy: ProxyId },
    Stream { stream: StreamId },
    Event { event: StreamEvent },
    Value { value: ProxyValue },
    Done,
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn from_error(err: &AppError) -> Self {
        Response::Error {
            kind: err.kind(),
            message: err.detail(),
        }
    }
}

/// Writes one value as a single JSON line.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), AppError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value)
        .map_err(|err| AppError::Protocol(format!("failed to encode frame: {err}")))?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next JSON line. `None` means the peer closed the connection.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, AppError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }

    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|err| AppError::Protocol(format!("malformed frame: {err}")))
}
