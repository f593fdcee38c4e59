use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use common::{error::AppError, utils::config::AppConfig};
use futures::{stream::BoxStream, StreamExt};

use crate::answer_retrieval::create_user_message;

/// Answer tokens in arrival order. The stream ends when the model is done.
pub type TokenStream = BoxStream<'static, Result<String, AppError>>;

/// A question together with the retrieved context it should be answered from.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub query: String,
    pub context: String,
}

/// Synthesizes an answer from retrieved context, whole or token by token.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &AnswerRequest) -> Result<String, AppError>;

    async fn stream(&self, request: &AnswerRequest) -> Result<TokenStream, AppError>;
}

pub struct OpenAiModel {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    system_prompt: String,
}

impl OpenAiModel {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String, system_prompt: String) -> Self {
        Self {
            client,
            model,
            system_prompt,
        }
    }

    pub fn from_config(client: Arc<Client<OpenAIConfig>>, config: &AppConfig) -> Self {
        Self::new(
            client,
            config.query_model.clone(),
            config.query_system_prompt.clone(),
        )
    }

    fn chat_request(
        &self,
        request: &AnswerRequest,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.0)
            .messages([
                ChatCompletionRequestSystemMessage::from(self.system_prompt.clone()).into(),
                ChatCompletionRequestUserMessage::from(create_user_message(
                    &request.context,
                    &request.query,
                ))
                .into(),
            ])
            .build()
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, request: &AnswerRequest) -> Result<String, AppError> {
        let response = self.client.chat().create(self.chat_request(request)?).await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::Inference("No content found in LLM response".into()))
    }

    async fn stream(&self, request: &AnswerRequest) -> Result<TokenStream, AppError> {
        let openai_stream = self
            .client
            .chat()
            .create_stream(self.chat_request(request)?)
            .await?;

        Ok(openai_stream
            .filter_map(|result| async move {
                match result {
                    Ok(response) => response
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.clone())
                        .filter(|content| !content.is_empty())
                        .map(Ok),
                    Err(err) => Some(Err(AppError::Inference(format!("Stream error: {err}")))),
                }
            })
            .boxed())
    }
}
