//! Full rebuild of the document and entity indexes.
//!
//! # Documents
//!
//! 1. Load every `.xml` file under the document root (capped by
//!    `indexing.doc_limit`, read with `indexing.num_workers` in flight).
//! 2. Annotate each parsable document, writing its sidecars and
//!    accumulating entity descriptions. Annotation failures degrade to
//!    empty annotations and never stop the run. Files that cannot be
//!    annotated are still indexed from their raw content.
//! 3. Clear the entity root and materialize the accumulated entities.
//! 4. Split, embed and swap the document index contents in one step.
//!
//! # Entities
//!
//! Load every `.txt` file under the entity root, split, embed, swap.
//!
//! The swap happens only after every span has been embedded, so an
//! embedding failure leaves the previous index contents in place.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::annotate::Annotator;
use crate::chunk::{record_id, split_spans};
use crate::config::Config;
use crate::corpus;
use crate::embedding::{embed_all, Embedder};
use crate::entities::{EntityCorpus, EntityDescriptions, MaterializeReport};
use crate::error::SkipReason;
use crate::llm::GenerationProvider;
use crate::loader::load_corpus;
use crate::models::{Corpus, IndexScope, VectorRecord};
use crate::progress::{ReindexProgressEvent, ReindexProgressReporter};
use crate::store::VectorStore;

/// What rebuilding one index did.
#[derive(Debug, Default, Clone)]
pub struct CorpusReport {
    pub files: usize,
    pub indexed: usize,
    /// Files indexed without annotation (documents) or not indexed (entities).
    pub skipped: Vec<(PathBuf, SkipReason)>,
    pub spans: usize,
}

#[derive(Debug, Default, Clone)]
pub struct AnnotationReport {
    pub annotated: usize,
    pub degraded: usize,
    pub sidecar_failures: usize,
}

#[derive(Debug, Default, Clone)]
pub struct ReindexReport {
    pub documents: Option<CorpusReport>,
    pub annotations: Option<AnnotationReport>,
    pub materialized: Option<MaterializeReport>,
    pub entities: Option<CorpusReport>,
}

/// Write targets for a rebuild, one per corpus in scope.
pub struct IndexTargets<'a> {
    pub documents: Option<&'a dyn VectorStore>,
    pub entities: Option<&'a dyn VectorStore>,
}

pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    annotator: Annotator,
    entity_corpus: Arc<EntityCorpus>,
    document_root: PathBuf,
    doc_cap: Option<usize>,
    num_workers: usize,
    span_max_tokens: usize,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn GenerationProvider>,
        entity_corpus: Arc<EntityCorpus>,
    ) -> Self {
        Self {
            embedder,
            annotator: Annotator::new(generator, config.annotation.input_token_limit),
            entity_corpus,
            document_root: config.paths.document_root.clone(),
            doc_cap: config.indexing.doc_cap(),
            num_workers: config.indexing.num_workers,
            span_max_tokens: config.indexing.span_max_tokens,
            batch_size: config.embedding.batch_size,
        }
    }

    /// Rebuild every index in `scope`. Documents go first so the entity
    /// index of a `both` rebuild sees the freshly materialized entities.
    pub async fn rebuild(
        &self,
        scope: IndexScope,
        targets: IndexTargets<'_>,
        progress: &dyn ReindexProgressReporter,
    ) -> Result<ReindexReport> {
        let mut report = ReindexReport::default();

        if scope.includes(Corpus::Documents) {
            let store = targets
                .documents
                .context("No document index opened for a documents rebuild")?;
            let (documents, annotations, materialized) =
                self.rebuild_documents(store, progress).await?;
            report.documents = Some(documents);
            report.annotations = Some(annotations);
            report.materialized = Some(materialized);
            if !scope.includes(Corpus::Entities) {
                warn!("entity ids were reassigned; the entity index is stale until `reindex entities`");
            }
        }

        if scope.includes(Corpus::Entities) {
            let store = targets
                .entities
                .context("No entity index opened for an entities rebuild")?;
            report.entities = Some(self.rebuild_entities(store, progress).await?);
        }

        Ok(report)
    }

    async fn rebuild_documents(
        &self,
        store: &dyn VectorStore,
        progress: &dyn ReindexProgressReporter,
    ) -> Result<(CorpusReport, AnnotationReport, MaterializeReport)> {
        progress.report(ReindexProgressEvent::Loading {
            corpus: Corpus::Documents.label().to_string(),
        });
        let files = load_corpus(&self.document_root, "xml", self.doc_cap, self.num_workers).await?;
        let total = files.len() as u64;

        let mut report = CorpusReport {
            files: files.len(),
            ..Default::default()
        };
        let mut annotations = AnnotationReport::default();
        let mut descriptions = EntityDescriptions::new();
        let mut texts = Vec::with_capacity(files.len());

        for (n, file) in files.into_iter().enumerate() {
            progress.report(ReindexProgressEvent::Annotating {
                n: n as u64 + 1,
                total,
            });
            // Unannotatable files are still indexed from their raw content.
            let doc = match corpus::parse_xml(file.content.as_bytes()) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "not annotating unparsable document");
                    report
                        .skipped
                        .push((file.path.clone(), SkipReason::Parse(e.to_string())));
                    texts.push((file.path, file.content));
                    continue;
                }
            };
            let text = doc.plain_text();
            if text.is_empty() {
                report
                    .skipped
                    .push((file.path.clone(), SkipReason::EmptyText));
                texts.push((file.path, file.content));
                continue;
            }

            for result in self
                .annotator
                .annotate_document(&file.path, &text, &mut descriptions)
                .await
            {
                match result {
                    Ok(field) if field.degraded.is_some() => annotations.degraded += 1,
                    Ok(_) => annotations.annotated += 1,
                    Err(_) => annotations.sidecar_failures += 1,
                }
            }
            texts.push((file.path, text));
        }

        self.entity_corpus.clear()?;
        let materialized = self.entity_corpus.materialize(&descriptions);

        report.indexed = texts.len();
        report.spans = self
            .index(Corpus::Documents, texts, store, progress)
            .await?;
        info!(
            files = report.files,
            indexed = report.indexed,
            spans = report.spans,
            entities = materialized.written,
            "document index rebuilt"
        );
        Ok((report, annotations, materialized))
    }

    async fn rebuild_entities(
        &self,
        store: &dyn VectorStore,
        progress: &dyn ReindexProgressReporter,
    ) -> Result<CorpusReport> {
        progress.report(ReindexProgressEvent::Loading {
            corpus: Corpus::Entities.label().to_string(),
        });
        let files = load_corpus(self.entity_corpus.root(), "txt", None, self.num_workers).await?;

        let mut report = CorpusReport {
            files: files.len(),
            ..Default::default()
        };
        let mut texts = Vec::with_capacity(files.len());
        for file in files {
            if file.content.trim().is_empty() {
                report.skipped.push((file.path, SkipReason::EmptyText));
                continue;
            }
            texts.push((file.path, file.content));
        }

        report.indexed = texts.len();
        report.spans = self.index(Corpus::Entities, texts, store, progress).await?;
        info!(
            files = report.files,
            spans = report.spans,
            "entity index rebuilt"
        );
        Ok(report)
    }

    /// Split every text into spans, embed them all, then replace the store
    /// contents. Returns the number of records written.
    async fn index(
        &self,
        corpus: Corpus,
        texts: Vec<(PathBuf, String)>,
        store: &dyn VectorStore,
        progress: &dyn ReindexProgressReporter,
    ) -> Result<usize> {
        let mut pending = Vec::new();
        for (path, text) in &texts {
            for span in split_spans(text, self.span_max_tokens) {
                pending.push((path.clone(), span));
            }
        }

        let total = pending.len() as u64;
        let mut records = Vec::with_capacity(pending.len());
        for batch in pending.chunks(self.batch_size.max(1)) {
            let inputs: Vec<String> = batch.iter().map(|(_, s)| s.text.clone()).collect();
            let vectors = embed_all(self.embedder.as_ref(), &inputs, self.batch_size)
                .await
                .with_context(|| format!("Failed to embed {} spans", corpus.label()))?;
            for ((path, span), vector) in batch.iter().zip(vectors) {
                records.push(VectorRecord {
                    id: record_id(path, span.index),
                    source_path: path.clone(),
                    span_index: span.index,
                    text: span.text.clone(),
                    marker: corpus.marker(),
                    vector,
                });
            }
            progress.report(ReindexProgressEvent::Embedding {
                corpus: corpus.label().to_string(),
                n: records.len() as u64,
                total,
            });
        }

        store.replace_all(&records).await
    }
}
