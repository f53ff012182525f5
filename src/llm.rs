//! Text-generation provider abstraction.
//!
//! [`GenerationProvider`] has two entry points: [`chat`](GenerationProvider::chat)
//! returns the final text (annotation), and
//! [`stream_chat`](GenerationProvider::stream_chat) returns a [`TokenStream`]
//! pulled token by token (conversation).
//!
//! Requests run behind the configured timeout and are never retried; a
//! timeout reaches the caller as an error.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::GenerationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Lazy, single-consumer sequence of response tokens.
///
/// Finite and not restartable. Dropping the stream stops the producer at
/// its next send.
pub struct TokenStream {
    rx: mpsc::Receiver<Result<String>>,
}

impl TokenStream {
    pub fn new(rx: mpsc::Receiver<Result<String>>) -> Self {
        Self { rx }
    }

    /// A stream that yields the given tokens, then ends.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        let (tx, rx) = mpsc::channel(tokens.len().max(1));
        for token in tokens {
            // Capacity covers every token, so this never fails.
            let _ = tx.try_send(Ok(token));
        }
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }

    /// Drain the stream into one string, stopping at the first error.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(token) = self.next().await {
            out.push_str(&token?);
        }
        Ok(out)
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream>;
}

// ============ Ollama ============

/// Calls `POST /api/chat` on an Ollama server.
pub struct OllamaGenerator {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let url = config
            .url
            .as_deref()
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            model: config.model.clone(),
            url,
            client,
        })
    }

    async fn post(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama chat error {}: {}", status, body_text);
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self.post(messages, false).await?;
        let json: Value = response.json().await?;
        parse_chat_response(&json)
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let response = self.post(messages, true).await?;
        let (tx, rx) = mpsc::channel(32);
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            let mut lines = NdjsonBuffer::default();
            while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                for line in lines.push(&chunk) {
                    if !forward_line(&line, &tx).await {
                        return;
                    }
                }
            }
            if let Some(line) = lines.finish() {
                forward_line(&line, &tx).await;
            }
        });

        Ok(TokenStream::new(rx))
    }
}

/// Send one NDJSON line's token downstream. Returns false once the stream
/// is over: done, failed, or the consumer went away.
async fn forward_line(line: &str, tx: &mpsc::Sender<Result<String>>) -> bool {
    match parse_stream_line(line) {
        Ok(StreamLine::Token(token)) => tx.send(Ok(token)).await.is_ok(),
        Ok(StreamLine::Done) => false,
        Ok(StreamLine::Empty) => true,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

fn parse_chat_response(json: &Value) -> Result<String> {
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        bail!("Ollama chat error: {}", err);
    }
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

/// Splits a byte stream into complete lines, holding partial lines across
/// network chunks.
#[derive(Default)]
struct NdjsonBuffer {
    pending: Vec<u8>,
}

impl NdjsonBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    /// The unterminated last line, if the stream ended without a newline.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreamLine {
    Token(String),
    Empty,
    Done,
}

fn parse_stream_line(line: &str) -> Result<StreamLine> {
    let json: Value = serde_json::from_str(line)?;
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        bail!("Ollama stream error: {}", err);
    }
    let token = json
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    if !token.is_empty() {
        return Ok(StreamLine::Token(token.to_string()));
    }
    if json.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
        return Ok(StreamLine::Done);
    }
    Ok(StreamLine::Empty)
}
