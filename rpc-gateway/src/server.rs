use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use common::error::AppError;
use index_manager::{Handoff, IndexManager, IndexSummary, StreamingQueryWorker};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    sync::{mpsc::unbounded_channel, Mutex},
    task::JoinSet,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::{new_nonce, verify_digest},
    protocol::{
        read_frame, write_frame, Frame, Handshake, ProxyId, ProxyValue, Request, Response,
        StreamId,
    },
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

struct StreamSlot {
    handoff: Arc<Mutex<Handoff>>,
    cancel: CancellationToken,
}

/// Proxies and streams owned by one client connection. Everything left here
/// when the connection closes is discarded, which cancels open streams.
#[derive(Default)]
struct ConnectionState {
    proxies: Mutex<HashMap<ProxyId, ProxyValue>>,
    streams: Mutex<HashMap<StreamId, StreamSlot>>,
}

impl ConnectionState {
    async fn park(&self, value: ProxyValue) -> ProxyId {
        let proxy = ProxyId::generate();
        self.proxies.lock().await.insert(proxy.clone(), value);
        proxy
    }
}

/// Serves an [`IndexManager`] to authenticated gateway clients.
pub struct GatewayServer {
    manager: Arc<IndexManager>,
    worker: StreamingQueryWorker,
    secret: String,
}

impl GatewayServer {
    pub fn new(manager: Arc<IndexManager>, secret: String) -> Self {
        Self {
            worker: StreamingQueryWorker::new(Arc::clone(&manager)),
            manager,
            secret,
        }
    }

    /// Accepts connections until the listener fails. Each connection runs on
    /// its own task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), AppError> {
        if let Ok(address) = listener.local_addr() {
            info!(%address, "gateway listening");
        }

        loop {
            let (socket, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(socket, peer).await {
                    warn!(%peer, error = %err, "gateway connection closed with error");
                }
            });
        }
    }

    #[instrument(skip_all, fields(%peer))]
    async fn handle_connection(
        self: Arc<Self>,
        socket: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), AppError> {
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);

        let nonce = new_nonce();
        write_frame(&mut write_half, &Handshake::Challenge { nonce: nonce.clone() }).await?;

        let answer = timeout(HANDSHAKE_TIMEOUT, read_frame::<_, Handshake>(&mut reader)).await;
        let authenticated = matches!(
            answer,
            Ok(Ok(Some(Handshake::Answer { ref digest }))) if verify_digest(&self.secret, &nonce, digest)
        );
        if !authenticated {
            let _ = write_frame(&mut write_half, &Handshake::Rejected).await;
            return Err(AppError::Protocol("client failed the challenge".into()));
        }
        write_frame(&mut write_half, &Handshake::Accepted).await?;
        debug!("gateway client authenticated");

        let (sender, mut outgoing) = unbounded_channel::<Frame<Response>>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = outgoing.recv().await {
                if let Err(err) = write_frame(&mut write_half, &frame).await {
                    debug!(error = %err, "gateway writer stopped");
                    break;
                }
            }
        });

        let state = Arc::new(ConnectionState::default());
        let mut in_flight = JoinSet::new();
        let result = loop {
            let frame = match read_frame::<_, Frame<Request>>(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            };
            while in_flight.try_join_next().is_some() {}

            let server = Arc::clone(&self);
            let state = Arc::clone(&state);
            let sender = sender.clone();
            in_flight.spawn(async move {
                let op = frame.body.op();
                let body = match server.dispatch(&state, frame.body).await {
                    Ok(body) => body,
                    Err(err) => {
                        debug!(op, error = %err, "gateway request failed");
                        Response::from_error(&err)
                    }
                };
                let _ = sender.send(Frame { id: frame.id, body });
            });
        };

        // Nobody is left to read the answers of requests still running
        if !in_flight.is_empty() {
            debug!(requests = in_flight.len(), "aborting requests of a closed connection");
        }
        in_flight.shutdown().await;

        for (_, slot) in state.streams.lock().await.drain() {
            slot.cancel.cancel();
        }
        state.proxies.lock().await.clear();
        drop(sender);
        let _ = writer.await;
        debug!("gateway client disconnected");

        result
    }

    async fn dispatch(
        &self,
        state: &ConnectionState,
        request: Request,
    ) -> Result<Response, AppError> {
        match request {
            Request::Activate { namespace } => {
                let index = self.manager.activate_namespace(&namespace).await?;
                Ok(Response::Activated {
                    summary: IndexSummary::from(index.as_ref()),
                })
            }
            Request::Insert { path, doc_id } => {
                let doc_id = self.manager.insert(&path, doc_id).await?;
                Ok(Response::Inserted { doc_id })
            }
            Request::Query { text, namespace } => {
                let answer = self.manager.query(&text, &namespace).await?;
                Ok(Response::Proxy {
                    proxy: state.park(ProxyValue::Answer(answer)).await,
                })
            }
            Request::ListDocuments => {
                let documents = self.manager.list_documents().await;
                Ok(Response::Proxy {
                    proxy: state.park(ProxyValue::Documents(documents)).await,
                })
            }
            Request::StartStream { text, namespace } => {
                let handoff = self.worker.start_stream(text, namespace);
                let stream = StreamId::generate();
                let slot = StreamSlot {
                    cancel: handoff.cancel_handle(),
                    handoff: Arc::new(Mutex::new(handoff)),
                };
                state.streams.lock().await.insert(stream.clone(), slot);
                Ok(Response::Stream { stream })
            }
            Request::NextEvent { stream } => {
                let handoff = state
                    .streams
                    .lock()
                    .await
                    .get(&stream)
                    .map(|slot| Arc::clone(&slot.handoff))
                    .ok_or_else(|| AppError::NotFound(format!("stream {stream}")))?;

                let event = handoff.lock().await.next().await;
                match event {
                    Some(event) => {
                        if event.is_sentinel() {
                            state.streams.lock().await.remove(&stream);
                        }
                        Ok(Response::Event { event })
                    }
                    None => {
                        state.streams.lock().await.remove(&stream);
                        Err(AppError::NotFound(format!("stream {stream} is closed")))
                    }
                }
            }
            Request::CancelStream { stream } => {
                if let Some(slot) = state.streams.lock().await.remove(&stream) {
                    slot.cancel.cancel();
                    debug!(%stream, "stream cancelled by client");
                }
                Ok(Response::Done)
            }
            Request::Fetch { proxy } => state
                .proxies
                .lock()
                .await
                .remove(&proxy)
                .map(|value| Response::Value { value })
                .ok_or_else(|| {
                    AppError::NotFound(format!("proxy {proxy} was already fetched or released"))
                }),
            Request::Release { proxy } => {
                state.proxies.lock().await.remove(&proxy);
                Ok(Response::Done)
            }
        }
    }
}
