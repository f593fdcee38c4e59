//! Deterministic model that answers with the retrieved context. It needs no
//! network access, so tests can assert on exact answers.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_stream::stream;
use async_trait::async_trait;
use common::error::AppError;
use futures::StreamExt;

use crate::model::{AnswerRequest, LanguageModel, TokenStream};

#[derive(Debug, Clone, Default)]
pub struct EchoModel {
    token_delay: Option<Duration>,
    fail_after: Option<usize>,
    emitted: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl EchoModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps before every streamed token and before a complete answer.
    #[must_use]
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Streams `tokens` tokens and then fails with an inference error.
    #[must_use]
    pub fn failing_after(mut self, tokens: usize) -> Self {
        self.fail_after = Some(tokens);
        self
    }

    /// Tokens handed out by streams of this model (and its clones) so far.
    pub fn tokens_emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Non-streamed answers of this model (and its clones) that ran to the end.
    pub fn completions(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn answer(request: &AnswerRequest) -> String {
        request.context.clone()
    }
}

#[async_trait]
impl LanguageModel for EchoModel {
    async fn complete(&self, request: &AnswerRequest) -> Result<String, AppError> {
        if let Some(delay) = self.token_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_after.is_some() {
            return Err(AppError::Inference("echo model configured to fail".into()));
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Self::answer(request))
    }

    async fn stream(&self, request: &AnswerRequest) -> Result<TokenStream, AppError> {
        let tokens: Vec<String> = Self::answer(request)
            .split_inclusive(' ')
            .map(str::to_owned)
            .collect();
        let delay = self.token_delay;
        let fail_after = self.fail_after;
        let emitted = Arc::clone(&self.emitted);

        Ok(stream! {
            for (index, token) in tokens.into_iter().enumerate() {
                if fail_after.is_some_and(|limit| index >= limit) {
                    yield Err(AppError::Inference("echo model configured to fail".into()));
                    return;
                }
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                emitted.fetch_add(1, Ordering::SeqCst);
                yield Ok(token);
            }
        }
        .boxed())
    }
}
