use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, error};
use url::Url;

use super::conversation_state::WireMessage;
use crate::endpoint::{ChatEndpoint, EndpointBody, STREAM_CONTENT_TYPE};
use crate::error::ChatError;
use crate::streaming::{decode_text, ChunkStream};

/// Where the chat sends its message log.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, messages: Vec<WireMessage>) -> Result<ChunkStream, ChatError>;
}

fn request_body(messages: Vec<WireMessage>) -> Value {
    json!({ "messages": messages })
}

const FALLBACK_ERROR: &str = "An error occurred during your request.";

fn error_from_body(status: u16, body: &Value) -> ChatError {
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or(FALLBACK_ERROR)
        .to_string();
    ChatError::Status { status, message }
}

/// Calls the chat endpoint in-process.
pub struct LocalEndpoint {
    endpoint: Arc<ChatEndpoint>,
}

impl LocalEndpoint {
    pub fn new(endpoint: Arc<ChatEndpoint>) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl CompletionService for LocalEndpoint {
    async fn complete(&self, messages: Vec<WireMessage>) -> Result<ChunkStream, ChatError> {
        let body = serde_json::to_vec(&request_body(messages))?;
        let response = self.endpoint.handle(&body).await;
        debug!("Chat response received: {}", response.status);

        if !response.status.is_success() {
            return Err(ChatError::Status {
                status: response.status.as_u16(),
                message: response.error_message().unwrap_or(FALLBACK_ERROR).to_string(),
            });
        }

        match response.body {
            EndpointBody::Stream(chunks) if response.content_type == STREAM_CONTENT_TYPE => {
                Ok(chunks)
            }
            _ => Err(ChatError::MalformedBody(format!(
                "expected a text stream, got {}",
                response.content_type
            ))),
        }
    }
}

/// Calls a deployed chat endpoint over HTTP.
pub struct RemoteEndpoint {
    url: Url,
    client: reqwest::Client,
}

impl RemoteEndpoint {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CompletionService for RemoteEndpoint {
    async fn complete(&self, messages: Vec<WireMessage>) -> Result<ChunkStream, ChatError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&request_body(messages))
            .send()
            .await?;

        let status = response.status();
        debug!("Chat response received: {}", status);
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Chat endpoint returned {}: {}", status, text);
            let body = serde_json::from_str::<Value>(&text)
                .unwrap_or_else(|_| json!({ "error": text }));
            return Err(error_from_body(status.as_u16(), &body));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ChatError::from))
            .boxed();
        Ok(decode_text(bytes))
    }
}
