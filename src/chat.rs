//! Conversational turns grounded on the document index.
//!
//! Each [`ChatSession::ask`] filters entity tokens out of the question,
//! retrieves the closest document spans, and streams the model's reply.
//! Memory is in-process and append-only; only the newest messages that fit
//! the token budget are replayed to the model.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::chunk::estimate_tokens;
use crate::embedding::Embedder;
use crate::llm::{ChatMessage, GenerationProvider, TokenStream};
use crate::query;
use crate::store::VectorStore;

pub const PERSONA: &str = "Tu est un chatbot, capable d'avoir des interactions normales et de discuter d'actualités. Répond en français.";

#[derive(Debug, Clone)]
pub struct ChatMemory {
    token_limit: usize,
    messages: Vec<ChatMessage>,
}

impl ChatMemory {
    pub fn new(token_limit: usize) -> Self {
        Self {
            token_limit,
            messages: Vec::new(),
        }
    }

    pub fn record_exchange(&mut self, question: &str, answer: &str) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(answer));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Newest messages whose estimated token total fits the budget, oldest
    /// first.
    pub fn window(&self) -> Vec<ChatMessage> {
        let mut used = 0;
        let mut kept = Vec::new();
        for message in self.messages.iter().rev() {
            used += estimate_tokens(&message.content);
            if used > self.token_limit {
                break;
            }
            kept.push(message.clone());
        }
        kept.reverse();
        kept
    }
}

/// Reply tokens for one turn. The exchange is added to the session memory
/// once the stream has been read to its end without error.
pub struct ChatStream {
    tokens: TokenStream,
    memory: Arc<Mutex<ChatMemory>>,
    question: String,
    answer: String,
    failed: bool,
    finished: bool,
}

impl ChatStream {
    pub async fn next(&mut self) -> Option<Result<String>> {
        if self.finished {
            return None;
        }
        match self.tokens.next().await {
            Some(Ok(token)) => {
                self.answer.push_str(&token);
                Some(Ok(token))
            }
            Some(Err(e)) => {
                self.failed = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                if !self.failed {
                    self.memory
                        .lock()
                        .await
                        .record_exchange(&self.question, &self.answer);
                }
                None
            }
        }
    }

    /// Read the remaining reply, stopping at the first error.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(token) = self.next().await {
            out.push_str(&token?);
        }
        Ok(out)
    }
}

pub struct ChatSession {
    embedder: Arc<dyn Embedder>,
    documents: Arc<dyn VectorStore>,
    generator: Arc<dyn GenerationProvider>,
    memory: Arc<Mutex<ChatMemory>>,
    top_k: usize,
}

impl ChatSession {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        documents: Arc<dyn VectorStore>,
        generator: Arc<dyn GenerationProvider>,
        token_limit: usize,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            documents,
            generator,
            memory: Arc::new(Mutex::new(ChatMemory::new(token_limit))),
            top_k,
        }
    }

    /// Snapshot of everything exchanged so far.
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.memory.lock().await.messages().to_vec()
    }

    async fn context(&self, question: &str) -> Result<String> {
        if question.is_empty() {
            return Ok(String::new());
        }
        let vector = self
            .embedder
            .embed(question)
            .await
            .context("Failed to embed chat question")?;
        let hits = self.documents.search(&vector, self.top_k).await?;
        debug!(hits = hits.len(), "chat context retrieved");
        Ok(hits
            .iter()
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Messages sent to the model for `question` (already filtered).
    pub async fn build_messages(&self, question: &str) -> Result<Vec<ChatMessage>> {
        let context = self.context(question).await?;
        let mut messages = vec![ChatMessage::system(format!(
            "{}\n\nContexte :\n{}",
            PERSONA, context
        ))];
        messages.extend(self.memory.lock().await.window());
        messages.push(ChatMessage::user(question));
        Ok(messages)
    }

    pub async fn ask(&self, question: &str) -> Result<ChatStream> {
        let question = query::filter(question);
        let messages = self.build_messages(&question).await?;
        let tokens = self.generator.stream_chat(&messages).await?;
        Ok(ChatStream {
            tokens,
            memory: Arc::clone(&self.memory),
            question,
            answer: String::new(),
            failed: false,
            finished: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::llm::Role;
    use crate::models::{RecordMarker, VectorRecord};
    use crate::store::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    struct Echo {
        tokens: Vec<&'static str>,
        fail: bool,
        seen: std::sync::Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl GenerationProvider for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
            Ok(self.tokens.concat())
        }

        async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
            self.seen.lock().unwrap().push(messages.to_vec());
            if !self.fail {
                return Ok(TokenStream::from_tokens(self.tokens.clone()));
            }
            let (tx, rx) = mpsc::channel(4);
            tx.send(Ok("début".to_string())).await.unwrap();
            tx.send(Err(anyhow::anyhow!("connection reset"))).await.unwrap();
            Ok(TokenStream::new(rx))
        }
    }

    fn echo(tokens: Vec<&'static str>, fail: bool) -> Arc<Echo> {
        Arc::new(Echo {
            tokens,
            fail,
            seen: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn session(generator: Arc<Echo>, token_limit: usize) -> ChatSession {
        let embedder = HashingEmbedder::new(64);
        let text = "La BCE relève ses taux directeurs";
        let store = InMemoryVectorStore::read_only(vec![VectorRecord {
            id: "r0".into(),
            source_path: PathBuf::from("/news/a.xml"),
            span_index: 0,
            text: text.into(),
            marker: RecordMarker::Document,
            vector: embedder.embed_text(text),
        }]);
        ChatSession::new(Arc::new(embedder), Arc::new(store), generator, token_limit, 3)
    }

    #[test]
    fn window_keeps_newest_within_budget() {
        let mut memory = ChatMemory::new(3);
        memory.record_exchange("aaaa", "bbbb");
        memory.record_exchange("cccc", "dddd");
        let window = memory.window();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].content, "bbbb");
        assert_eq!(window[2].content, "dddd");
        assert_eq!(ChatMemory::new(0).window().len(), 0);
    }

    #[tokio::test]
    async fn exchange_recorded_after_exhaustion() {
        let generator = echo(vec!["Bonjour", " !"], false);
        let session = session(generator.clone(), 500);

        let mut stream = session.ask("c0003 taux BCE").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "Bonjour");
        assert!(session.history().await.is_empty());
        assert_eq!(stream.next().await.unwrap().unwrap(), " !");
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());

        let history = session.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "taux BCE");
        assert_eq!(history[1].content, "Bonjour !");

        let seen = generator.seen.lock().unwrap();
        let first = &seen[0];
        assert_eq!(first[0].role, Role::System);
        assert!(first[0].content.starts_with(PERSONA));
        assert!(first[0].content.contains("taux directeurs"));
        assert_eq!(first.last().unwrap().content, "taux BCE");
    }

    #[tokio::test]
    async fn history_is_replayed_on_next_turn() {
        let generator = echo(vec!["ok"], false);
        let session = session(generator.clone(), 500);
        session.ask("première").await.unwrap().collect_text().await.unwrap();
        session.ask("seconde").await.unwrap().collect_text().await.unwrap();

        let seen = generator.seen.lock().unwrap();
        let second = &seen[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[1].content, "première");
        assert_eq!(second[2].content, "ok");
        assert_eq!(second[3].content, "seconde");
    }

    #[tokio::test]
    async fn failed_stream_is_not_recorded() {
        let session = session(echo(vec![], true), 500);
        let result = session.ask("taux").await.unwrap().collect_text().await;
        assert!(result.is_err());
        assert!(session.history().await.is_empty());
    }
}
