//! Composition root.
//!
//! A [`Toolkit`] owns the configuration, the model collaborators and the
//! vector stores opened for one [`OpenMode`] and [`IndexScope`], and exposes
//! the pipeline operations the CLI (or any other caller) drives.
//!
//! Serving opens both indexes read-only; reindexing opens only the indexes
//! being rebuilt, in exclusive-write mode.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::chat::{ChatSession, ChatStream};
use crate::config::Config;
use crate::corpus::{CorpusBuilder, IngestReport};
use crate::embedding::{create_embedder, Embedder};
use crate::entities::EntityCorpus;
use crate::error::ExpansionError;
use crate::indexer::{IndexTargets, Indexer, ReindexReport};
use crate::llm::{GenerationProvider, OllamaGenerator};
use crate::models::{Corpus, IndexScope};
use crate::progress::ReindexProgressReporter;
use crate::retrieve::Retriever;
use crate::store::{OpenMode, SqliteVectorStore, VectorStore};

/// Outcome of a reindex: feed ingestion (documents scope only) then the
/// index rebuild.
#[derive(Debug, Default, Clone)]
pub struct ReindexSummary {
    pub ingest: Option<IngestReport>,
    pub index: ReindexReport,
}

pub struct Toolkit {
    config: Config,
    mode: OpenMode,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn GenerationProvider>,
    entities: Arc<EntityCorpus>,
    documents: Option<Arc<dyn VectorStore>>,
    entity_index: Option<Arc<dyn VectorStore>>,
    retriever: Retriever,
    chat: Option<ChatSession>,
}

impl Toolkit {
    /// Open the configured collaborators and the SQLite index of every
    /// corpus in `scope`.
    pub async fn open(config: Config, mode: OpenMode, scope: IndexScope) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator: Arc<dyn GenerationProvider> =
            Arc::new(OllamaGenerator::new(&config.generation)?);

        let documents: Option<Arc<dyn VectorStore>> = if scope.includes(Corpus::Documents) {
            Some(Arc::new(
                SqliteVectorStore::open(&config.paths.document_index, mode).await?,
            ))
        } else {
            None
        };
        let entity_index: Option<Arc<dyn VectorStore>> = if scope.includes(Corpus::Entities) {
            Some(Arc::new(
                SqliteVectorStore::open(&config.paths.entity_index, mode).await?,
            ))
        } else {
            None
        };

        Ok(Self::from_parts(
            config,
            mode,
            embedder,
            generator,
            documents,
            entity_index,
        ))
    }

    /// Assemble a toolkit from already-built collaborators.
    pub fn from_parts(
        config: Config,
        mode: OpenMode,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn GenerationProvider>,
        documents: Option<Arc<dyn VectorStore>>,
        entity_index: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        let entities = Arc::new(EntityCorpus::new(
            config.paths.entity_root.clone(),
            config.entities.max_filename_len,
        ));
        let retriever = Retriever::new(
            Arc::clone(&embedder),
            documents.clone(),
            entity_index.clone(),
            Arc::clone(&entities),
            config.retrieval.clone(),
        );
        let chat = documents.as_ref().map(|store| {
            ChatSession::new(
                Arc::clone(&embedder),
                Arc::clone(store),
                Arc::clone(&generator),
                config.chat.token_limit,
                config.retrieval.span_top_k,
            )
        });
        Self {
            config,
            mode,
            embedder,
            generator,
            entities,
            documents,
            entity_index,
            retriever,
            chat,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Fetch every configured feed into the document root.
    pub async fn ingest(&self) -> Result<IngestReport> {
        CorpusBuilder::new(&self.config)?
            .ingest_feeds(&self.config.paths.feed_list)
            .await
    }

    /// Rebuild the indexes in `scope`. A documents rebuild ingests the
    /// feeds first.
    pub async fn reindex(
        &self,
        scope: IndexScope,
        progress: &dyn ReindexProgressReporter,
    ) -> Result<ReindexSummary> {
        if self.mode != OpenMode::ExclusiveWrite {
            bail!("Reindex requires the indexes to be opened in exclusive-write mode");
        }

        let ingest = if scope.includes(Corpus::Documents) {
            Some(self.ingest().await?)
        } else {
            None
        };

        let indexer = Indexer::new(
            &self.config,
            Arc::clone(&self.embedder),
            Arc::clone(&self.generator),
            Arc::clone(&self.entities),
        );
        let targets = IndexTargets {
            documents: self.documents.as_deref(),
            entities: self.entity_index.as_deref(),
        };
        let index = indexer.rebuild(scope, targets, progress).await?;
        Ok(ReindexSummary { ingest, index })
    }

    /// Document search rendered as an HTML table. `query_is_file` marks a
    /// query read from an uploaded file; it is not entity-expanded.
    pub async fn retrieve(&self, query: &str, query_is_file: bool) -> Result<String> {
        self.retriever.search(query, query_is_file).await
    }

    /// Entity search rendered as an HTML table.
    pub async fn extend(&self, query: &str) -> Result<String> {
        self.retriever.extend(query).await
    }

    /// One chat turn; the reply streams as it is generated.
    pub async fn ask(&self, question: &str) -> Result<ChatStream> {
        match &self.chat {
            Some(chat) => chat.ask(question).await,
            None => bail!("Chat needs the document index; open the toolkit with documents in scope"),
        }
    }

    pub fn chat_session(&self) -> Option<&ChatSession> {
        self.chat.as_ref()
    }

    pub fn filter_query(&self, query: &str) -> String {
        self.retriever.expander().filter(query)
    }

    pub fn expand_query(&self, query: &str) -> Result<String, ExpansionError> {
        self.retriever.expander().expand(query)
    }
}
