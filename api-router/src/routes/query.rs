use std::{pin::Pin, time::Duration};

use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, KeepAlive, KeepAliveStream},
        IntoResponse, Sse,
    },
    Json,
};
use common::error::AppError;
use futures::{Stream, StreamExt};
use index_manager::StreamEvent;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::{api_state::ApiState, error::ApiError};

type EventResultStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;

/// `text` is the question, `uuid` the namespace (document id) to ask it against.
#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub text: Option<String>,
    pub uuid: Option<String>,
}

impl QueryParams {
    fn require(self) -> Result<(String, String), ApiError> {
        let text = self
            .text
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ApiError::ValidationError("missing query parameter 'text'".into()))?;
        let namespace = self
            .uuid
            .filter(|uuid| !uuid.trim().is_empty())
            .ok_or_else(|| ApiError::ValidationError("missing query parameter 'uuid'".into()))?;
        Ok((text, namespace))
    }
}

pub async fn query(
    State(state): State<ApiState>,
    Query(params): Query<QueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (text, namespace) = params.require()?;
    info!(namespace = %namespace, query_chars = text.len(), "Received query");

    let answer = state.index.query(&text, &namespace).await?;

    Ok(Json(json!({ "text": answer.text, "sources": answer.sources })))
}

pub async fn stream(
    State(state): State<ApiState>,
    Query(params): Query<QueryParams>,
) -> Result<Sse<KeepAliveStream<EventResultStream>>, ApiError> {
    let (text, namespace) = params.require()?;
    info!(namespace = %namespace, query_chars = text.len(), "Received streaming query");

    let events = state.index.start_stream(&text, &namespace).await?;
    let event_stream: EventResultStream = events.map(|event| Ok(to_sse_event(event))).boxed();

    Ok(Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn to_sse_event(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Chunk { text } => Event::default().event("chunk").data(text),
        StreamEvent::End => Event::default().event("end").data("Stream complete"),
        StreamEvent::Error { kind, message } => {
            debug!(?kind, "stream ended with an error");
            let public = ApiError::from(AppError::from_remote(kind, message));
            Event::default().event("error").data(public.public_message())
        }
    }
}
