/// Generation Backend - Streaming Chat Completions
///
/// **Contract:**
/// `generate` sends each decoded token into the provided channel while the
/// request is in flight and returns the final text once the backend is done.
/// Decoding is greedy and bounded by `max_new_tokens`.
///
/// Production uses `HttpGenerator` against any OpenAI-compatible
/// `/chat/completions` endpoint (Ollama, vLLM, llama.cpp server).

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use repairbench_common::config::GenerationSettings;
use repairbench_common::types::{Conversation, Turn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type TokenSender = mpsc::UnboundedSender<String>;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed stream event: {0}")]
    Stream(String),
    #[error("model produced no tokens")]
    Empty,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        conversation: &Conversation,
        tokens: TokenSender,
    ) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Incremental server-sent-events decoder
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(data) = line.strip_prefix("data:") else {
                // comments, event names, keep-alives
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                events.push(SseEvent::Data(data.to_string()));
            }
        }

        events
    }
}

/// Pull the token text out of one chat-completion chunk
pub fn delta_content(data: &str) -> Result<Option<String>, GenerationError> {
    let chunk: ChatChunk =
        serde_json::from_str(data).map_err(|e| GenerationError::Stream(e.to_string()))?;

    if let Some(error) = chunk.error {
        return Err(GenerationError::Backend(error.to_string()));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_new_tokens: u32,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(
        settings: &GenerationSettings,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            max_new_tokens: settings.max_new_tokens,
            api_key,
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(
        &self,
        conversation: &Conversation,
        tokens: TokenSender,
    ) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: conversation.turns(),
            stream: true,
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: self.max_new_tokens,
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut text = String::new();
        let mut receiver_gone = false;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in decoder.push(&chunk) {
                match event {
                    SseEvent::Done => break 'read,
                    SseEvent::Data(data) => {
                        let Some(token) = delta_content(&data)? else {
                            continue;
                        };
                        text.push_str(&token);
                        if tokens.send(token).is_err() && !receiver_gone {
                            warn!("Token receiver dropped; continuing without streaming");
                            receiver_gone = true;
                        }
                    }
                }
            }
        }

        debug!(model = %self.model, chars = text.len(), "Generation finished");
        Ok(text)
    }
}
