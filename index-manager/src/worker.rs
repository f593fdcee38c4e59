use std::sync::Arc;

use common::error::AppError;
use futures::{stream, StreamExt};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    events::{AnswerStream, StreamEvent},
    manager::IndexManager,
};

/// Runs streaming queries on their own tasks so the caller never blocks on
/// retrieval or inference.
#[derive(Clone)]
pub struct StreamingQueryWorker {
    manager: Arc<IndexManager>,
}

impl StreamingQueryWorker {
    pub fn new(manager: Arc<IndexManager>) -> Self {
        Self { manager }
    }

    /// Spawns a producer task for one query and returns the consumer end.
    pub fn start_stream(&self, text: String, namespace: String) -> Handoff {
        let (sender, receiver) = unbounded_channel();
        let cancel = CancellationToken::new();
        let producer_cancel = cancel.clone();
        let manager = Arc::clone(&self.manager);

        let task = tokio::spawn(async move {
            let log_namespace = namespace.clone();
            tokio::select! {
                () = producer_cancel.cancelled() => {
                    debug!(namespace = %log_namespace, "stream cancelled by consumer");
                }
                () = produce(manager, text, namespace, sender) => {}
            }
        });

        Handoff {
            receiver,
            cancel,
            task,
            finished: false,
        }
    }
}

async fn produce(
    manager: Arc<IndexManager>,
    text: String,
    namespace: String,
    sender: UnboundedSender<StreamEvent>,
) {
    // A fresh snapshot, so the stream sees every insert committed before it started
    if let Err(err) = manager.activate_namespace(&namespace).await {
        debug!(namespace = %namespace, error = %err, "stream namespace failed to activate");
        let _ = sender.send(StreamEvent::from_error(&err));
        return;
    }

    let mut events = match manager.query_stream(&text, &namespace).await {
        Ok(events) => events,
        Err(err) => {
            debug!(namespace = %namespace, error = %err, "stream failed before it started");
            let _ = sender.send(StreamEvent::from_error(&err));
            return;
        }
    };

    let mut sentinel_sent = false;
    while let Some(event) = events.next().await {
        let is_sentinel = event.is_sentinel();
        if sender.send(event).is_err() {
            debug!(namespace = %namespace, "stream consumer went away");
            return;
        }
        if is_sentinel {
            sentinel_sent = true;
            break;
        }
    }

    if !sentinel_sent {
        let _ = sender.send(StreamEvent::End);
    }
}

/// Consumer end of one streaming query. Yields chunks in production order,
/// then exactly one sentinel, then `None`. Dropping it cancels the producer.
pub struct Handoff {
    receiver: UnboundedReceiver<StreamEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    finished: bool,
}

impl Handoff {
    fn settle(&mut self, received: Option<StreamEvent>) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        if received.is_none() && self.cancel.is_cancelled() {
            self.finished = true;
            return None;
        }
        let event = received.unwrap_or_else(|| {
            // The producer stopped without a sentinel, so it panicked
            warn!("stream producer ended without a sentinel");
            StreamEvent::from_error(&AppError::InternalError(
                "stream producer stopped unexpectedly".into(),
            ))
        });
        if event.is_sentinel() {
            self.finished = true;
        }
        Some(event)
    }

    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        let received = self.receiver.recv().await;
        self.settle(received)
    }

    /// Synchronous variant of [`Handoff::next`]. Must not be called from
    /// within an async context.
    pub fn blocking_next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        let received = self.receiver.blocking_recv();
        self.settle(received)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this stream without needing the handoff itself.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True once the producer task has exited.
    pub fn producer_done(&self) -> bool {
        self.task.is_finished()
    }

    pub fn into_events(self) -> AnswerStream {
        stream::unfold(self, |mut handoff| async move {
            handoff.next().await.map(|event| (event, handoff))
        })
        .boxed()
    }
}

impl Drop for Handoff {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
