use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, error};

use crate::cli::chat::conversation_state::WireMessage;
use crate::error::ChatError;
use crate::streaming::{decode_sse, ChunkStream};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: &'a [WireMessage],
}

/// Streaming client for the OpenAI chat completions API.
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Start a streamed completion for `messages`.
    ///
    /// Fails before any text is produced when the request cannot be sent or
    /// the API answers with a non-success status; failures while reading the
    /// body surface as items of the returned stream.
    pub async fn stream_chat(&self, messages: &[WireMessage]) -> Result<ChunkStream, ChatError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.model,
            stream: true,
            messages,
        };

        debug!(
            "Making request to OpenAI with {} message(s): {:?}",
            messages.len(),
            messages
                .iter()
                .map(|m| (m.role.as_str(), m.content.chars().count()))
                .collect::<Vec<_>>()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        debug!("OpenAI response received: {}", status);
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("OpenAI returned non-200 status {}: {}", status, error_text);
            return Err(ChatError::Status {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ChatError::from))
            .boxed();
        Ok(decode_sse(bytes))
    }
}
