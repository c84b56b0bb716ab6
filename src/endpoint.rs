//! The chat completion endpoint.
//!
//! Accepts `{ "messages": [{role, content}, ...] }`, forwards it to OpenAI and
//! answers with a plain text stream of the reply. Errors are JSON bodies of the
//! form `{ "error": ..., "details": ... }`, with `details` only attached in
//! development mode.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::cli::chat::conversation_state::WireMessage;
use crate::config::{Config, Environment};
use crate::error::ChatError;
use crate::openai_client::OpenAiClient;
use crate::streaming::ChunkStream;

pub const STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const JSON_CONTENT_TYPE: &str = "application/json";

pub enum EndpointBody {
    Json(Value),
    Stream(ChunkStream),
}

pub struct EndpointResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: EndpointBody,
}

impl EndpointResponse {
    fn error(status: StatusCode, message: &str, details: Option<Value>) -> Self {
        let mut body = json!({ "error": message });
        if let Some(details) = details {
            body["details"] = details;
        }
        Self {
            status,
            content_type: JSON_CONTENT_TYPE,
            body: EndpointBody::Json(body),
        }
    }

    fn stream(chunks: ChunkStream) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: STREAM_CONTENT_TYPE,
            body: EndpointBody::Stream(chunks),
        }
    }

    /// Error message of a JSON error body.
    pub fn error_message(&self) -> Option<&str> {
        match &self.body {
            EndpointBody::Json(body) => body.get("error").and_then(Value::as_str),
            EndpointBody::Stream(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ChatRequest {
    messages: Option<Value>,
}

/// Upstream the endpoint forwards conversations to.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    async fn stream_chat(&self, messages: &[WireMessage]) -> Result<ChunkStream, ChatError>;
}

#[async_trait::async_trait]
impl Upstream for OpenAiClient {
    async fn stream_chat(&self, messages: &[WireMessage]) -> Result<ChunkStream, ChatError> {
        OpenAiClient::stream_chat(self, messages).await
    }
}

pub struct ChatEndpoint {
    upstream: Option<Box<dyn Upstream>>,
    environment: Environment,
}

impl ChatEndpoint {
    pub fn new(upstream: Option<Box<dyn Upstream>>, environment: Environment) -> Self {
        Self {
            upstream,
            environment,
        }
    }

    /// Endpoint talking to OpenAI, or to nothing when no key is configured.
    pub fn from_config(config: &Config) -> Self {
        let upstream = config.openai_api_key.as_deref().map(|key| {
            let client = OpenAiClient::new(key, &config.openai_base_url, &config.openai_model);
            debug!("Chat endpoint forwarding to model {}", client.model());
            Box::new(client) as Box<dyn Upstream>
        });
        Self::new(upstream, config.environment)
    }

    pub async fn handle(&self, body: &[u8]) -> EndpointResponse {
        debug!("Chat API request received: {} byte(s)", body.len());

        let messages = match parse_messages(body) {
            Ok(messages) => messages,
            Err(message) => {
                info!("Rejecting chat request: {}", message);
                return EndpointResponse::error(StatusCode::BAD_REQUEST, message, None);
            }
        };

        let Some(upstream) = &self.upstream else {
            error!("OpenAI API key missing");
            return EndpointResponse::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "OpenAI API key not configured",
                None,
            );
        };

        let result = match to_wire(messages) {
            Ok(messages) => upstream.stream_chat(&messages).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(chunks) => EndpointResponse::stream(chunks),
            Err(e) => {
                error!("OpenAI API request failed: {:?}", e);
                let message = match &e {
                    ChatError::Status { status, .. } => {
                        format!("OpenAI returned status {}", status)
                    }
                    _ => "Failed to get response from OpenAI".to_string(),
                };
                let details = self.details(&e);
                EndpointResponse::error(StatusCode::INTERNAL_SERVER_ERROR, &message, details)
            }
        }
    }

    fn details(&self, e: &ChatError) -> Option<Value> {
        match self.environment {
            Environment::Development => Some(json!({
                "message": e.to_string(),
                "debug": format!("{:?}", e),
            })),
            Environment::Production => None,
        }
    }
}

fn parse_messages(body: &[u8]) -> Result<Vec<Value>, &'static str> {
    let request: ChatRequest =
        serde_json::from_slice(body).map_err(|_| "Invalid request body")?;

    match request.messages {
        Some(Value::Array(items)) if !items.is_empty() => Ok(items),
        _ => Err("Messages must be a non-empty array"),
    }
}

/// Entries the upstream cannot take (unknown role, missing content) fail the
/// request like any other upstream rejection.
fn to_wire(messages: Vec<Value>) -> Result<Vec<WireMessage>, ChatError> {
    messages
        .into_iter()
        .map(|message| serde_json::from_value::<WireMessage>(message).map_err(ChatError::from))
        .collect()
}
