use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use common::{error::AppError, utils::config::AppConfig};
use futures::{stream, StreamExt};
use index_manager::{DocumentListing, EventStream, IndexService, IndexSummary, StreamEvent};
use retrieval_pipeline::Answer;
use tokio::{
    io::BufReader,
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tokio_retry::{strategy::FixedInterval, RetryIf};
use tracing::{debug, info, warn};

use crate::{
    auth::challenge_digest,
    protocol::{
        read_frame, write_frame, Frame, Handshake, ProxyId, ProxyValue, Request, Response,
        StreamId,
    },
};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

#[derive(Debug, Clone)]
pub struct GatewayClientConfig {
    pub address: String,
    pub secret: String,
    pub connect_attempts: usize,
    pub retry_interval: Duration,
}

impl GatewayClientConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            address: config.gateway_address.clone(),
            secret: config.gateway_secret.clone(),
            connect_attempts: config.gateway_connect_attempts,
            retry_interval: Duration::from_secs(config.gateway_retry_interval_secs),
        }
    }
}

struct ClientInner {
    address: String,
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Connection to a remote index process. Cheap to clone; clones share one
/// socket and requests are pipelined over it.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl GatewayClient {
    /// Connects with the configured number of attempts, waiting a fixed
    /// interval between them. Only unreachable gateways are retried; a
    /// rejected secret fails immediately.
    pub async fn connect(config: &GatewayClientConfig) -> Result<Self, AppError> {
        let attempts = config.connect_attempts.max(1);
        let strategy = FixedInterval::new(config.retry_interval).take(attempts.saturating_sub(1));

        let result = RetryIf::spawn(
            strategy,
            || Self::attempt(config),
            |err: &AppError| matches!(err, AppError::GatewayUnavailable(_)),
        )
        .await;

        match result {
            Err(AppError::GatewayUnavailable(detail)) => Err(AppError::GatewayUnavailable(
                format!("{} unreachable after {attempts} attempts: {detail}", config.address),
            )),
            other => other,
        }
    }

    async fn attempt(config: &GatewayClientConfig) -> Result<Self, AppError> {
        let attempt = Self::connect_once(&config.address, &config.secret).await;
        if let Err(err) = &attempt {
            warn!(address = %config.address, error = %err, "gateway connect attempt failed");
        }
        attempt
    }

    pub async fn connect_once(address: &str, secret: &str) -> Result<Self, AppError> {
        let socket = TcpStream::connect(address)
            .await
            .map_err(|err| AppError::GatewayUnavailable(format!("{address}: {err}")))?;
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);

        let nonce = match read_frame::<_, Handshake>(&mut reader).await? {
            Some(Handshake::Challenge { nonce }) => nonce,
            Some(other) => {
                return Err(AppError::Protocol(format!(
                    "expected a challenge, got {other:?}"
                )))
            }
            None => {
                return Err(AppError::GatewayUnavailable(format!(
                    "{address} closed the connection before the challenge"
                )))
            }
        };
        write_frame(
            &mut write_half,
            &Handshake::Answer {
                digest: challenge_digest(secret, &nonce),
            },
        )
        .await?;

        match read_frame::<_, Handshake>(&mut reader).await? {
            Some(Handshake::Accepted) => {}
            Some(Handshake::Rejected) | None => {
                return Err(AppError::Configuration(format!(
                    "gateway at {address} rejected the shared secret"
                )))
            }
            Some(other) => {
                return Err(AppError::Protocol(format!(
                    "expected a handshake verdict, got {other:?}"
                )))
            }
        }
        info!(%address, "connected to gateway");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_responses(
            reader,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Ok(Self {
            inner: Arc::new(ClientInner {
                address: address.to_owned(),
                writer: Mutex::new(write_half),
                pending,
                closed,
                next_id: AtomicU64::new(1),
                reader,
            }),
        })
    }

    async fn call(&self, body: Request) -> Result<Response, AppError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(self.disconnected());
            }
            pending.insert(id, sender);
        }

        let written = {
            let mut writer = self.inner.writer.lock().await;
            write_frame(&mut *writer, &Frame { id, body }).await
        };
        if let Err(err) = written {
            self.inner.pending.lock().await.remove(&id);
            return Err(AppError::GatewayUnavailable(format!(
                "{}: {}",
                self.inner.address,
                err.detail()
            )));
        }

        match receiver.await.map_err(|_| self.disconnected())? {
            Response::Error { kind, message } => Err(AppError::from_remote(kind, message)),
            response => Ok(response),
        }
    }

    fn disconnected(&self) -> AppError {
        AppError::GatewayUnavailable(format!("connection to {} was lost", self.inner.address))
    }

    pub async fn query_proxy(&self, text: &str, namespace: &str) -> Result<ProxyId, AppError> {
        match self
            .call(Request::Query {
                text: text.to_owned(),
                namespace: namespace.to_owned(),
            })
            .await?
        {
            Response::Proxy { proxy } => Ok(proxy),
            other => Err(unexpected("query", &other)),
        }
    }

    pub async fn documents_proxy(&self) -> Result<ProxyId, AppError> {
        match self.call(Request::ListDocuments).await? {
            Response::Proxy { proxy } => Ok(proxy),
            other => Err(unexpected("list_documents", &other)),
        }
    }

    /// Resolves a proxy. The server forgets the value once it is fetched.
    pub async fn fetch(&self, proxy: &ProxyId) -> Result<ProxyValue, AppError> {
        match self
            .call(Request::Fetch {
                proxy: proxy.clone(),
            })
            .await?
        {
            Response::Value { value } => Ok(value),
            other => Err(unexpected("fetch", &other)),
        }
    }

    pub async fn release(&self, proxy: &ProxyId) -> Result<(), AppError> {
        match self
            .call(Request::Release {
                proxy: proxy.clone(),
            })
            .await?
        {
            Response::Done => Ok(()),
            other => Err(unexpected("release", &other)),
        }
    }

    pub async fn open_stream(&self, text: &str, namespace: &str) -> Result<StreamId, AppError> {
        match self
            .call(Request::StartStream {
                text: text.to_owned(),
                namespace: namespace.to_owned(),
            })
            .await?
        {
            Response::Stream { stream } => Ok(stream),
            other => Err(unexpected("start_stream", &other)),
        }
    }

    pub async fn next_event(&self, stream: &StreamId) -> Result<StreamEvent, AppError> {
        match self
            .call(Request::NextEvent {
                stream: stream.clone(),
            })
            .await?
        {
            Response::Event { event } => Ok(event),
            other => Err(unexpected("next_event", &other)),
        }
    }

    pub async fn cancel_stream(&self, stream: &StreamId) -> Result<(), AppError> {
        match self
            .call(Request::CancelStream {
                stream: stream.clone(),
            })
            .await?
        {
            Response::Done => Ok(()),
            other => Err(unexpected("cancel_stream", &other)),
        }
    }
}

fn unexpected(op: &str, response: &Response) -> AppError {
    AppError::Protocol(format!("unexpected response to {op}: {response:?}"))
}

async fn read_responses(
    mut reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) {
    loop {
        match read_frame::<_, Frame<Response>>(&mut reader).await {
            Ok(Some(frame)) => {
                let waiter = pending.lock().await.remove(&frame.id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(frame.body);
                    }
                    None => debug!(id = frame.id, "response for an abandoned request"),
                }
            }
            Ok(None) => {
                debug!("gateway closed the connection");
                break;
            }
            Err(err) => {
                warn!(error = %err, "gateway connection failed");
                break;
            }
        }
    }

    let mut pending = pending.lock().await;
    closed.store(true, Ordering::Release);
    pending.clear();
}

/// Client side of a remote stream. Cancels the server-side producer if it is
/// dropped before the sentinel arrives.
struct RemoteStream {
    client: GatewayClient,
    stream: StreamId,
    finished: bool,
}

impl Drop for RemoteStream {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let client = self.client.clone();
        let stream = self.stream.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = client.cancel_stream(&stream).await {
                    debug!(%stream, error = %err, "failed to cancel remote stream");
                }
            });
        }
    }
}

#[async_trait]
impl IndexService for GatewayClient {
    async fn activate(&self, namespace: &str) -> Result<IndexSummary, AppError> {
        match self
            .call(Request::Activate {
                namespace: namespace.to_owned(),
            })
            .await?
        {
            Response::Activated { summary } => Ok(summary),
            other => Err(unexpected("activate", &other)),
        }
    }

    async fn insert(&self, path: &Path, doc_id: Option<String>) -> Result<String, AppError> {
        match self
            .call(Request::Insert {
                path: path.to_path_buf(),
                doc_id,
            })
            .await?
        {
            Response::Inserted { doc_id } => Ok(doc_id),
            other => Err(unexpected("insert", &other)),
        }
    }

    async fn query(&self, text: &str, namespace: &str) -> Result<Answer, AppError> {
        let proxy = self.query_proxy(text, namespace).await?;
        match self.fetch(&proxy).await? {
            ProxyValue::Answer(answer) => Ok(answer),
            other => Err(AppError::Protocol(format!(
                "query proxy resolved to {other:?}"
            ))),
        }
    }

    async fn start_stream(&self, text: &str, namespace: &str) -> Result<EventStream, AppError> {
        let remote = RemoteStream {
            client: self.clone(),
            stream: self.open_stream(text, namespace).await?,
            finished: false,
        };

        Ok(stream::unfold(remote, |mut remote| async move {
            if remote.finished {
                return None;
            }
            let event = remote
                .client
                .next_event(&remote.stream)
                .await
                .unwrap_or_else(|err| StreamEvent::from_error(&err));
            if event.is_sentinel() {
                remote.finished = true;
            }
            Some((event, remote))
        })
        .boxed())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentListing>, AppError> {
        let proxy = self.documents_proxy().await?;
        match self.fetch(&proxy).await? {
            ProxyValue::Documents(documents) => Ok(documents),
            other => Err(AppError::Protocol(format!(
                "document proxy resolved to {other:?}"
            ))),
        }
    }
}
