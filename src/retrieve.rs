//! k-NN retrieval rendered as HTML result tables.
//!
//! Document search embeds the (entity-expanded) query, takes the top-k
//! spans, and renders one row per distinct source file in first-seen rank
//! order. Entity search renders one row per distinct entity, skipping
//! entities with no short textual form, until the display limit is reached.
//!
//! Rendering is best-effort: a hit whose source file is gone or no longer
//! parses is silently left out.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::annotate::{sidecar_path, FIELDS};
use crate::config::RetrievalConfig;
use crate::corpus;
use crate::embedding::Embedder;
use crate::entities::EntityCorpus;
use crate::models::{Corpus, Document, EntityId};
use crate::query::{strip_markup, QueryExpander};
use crate::store::{SearchHit, VectorStore};

/// Escape text for HTML element content or a quoted attribute.
fn escape(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}

/// First `max_chars` characters, with `...` appended when cut.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Host part of a link, for the source column.
pub fn link_host(link: &str) -> Option<String> {
    reqwest::Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Distinct source paths among `hits`, in first-seen (rank) order.
pub fn distinct_sources(hits: &[SearchHit]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|h| seen.insert(h.source_path.clone()))
        .map(|h| h.source_path.clone())
        .collect()
}

/// Short textual forms of an entity description: distinct non-empty lines
/// shorter than `max_len` characters, flattened to plain text.
pub fn entity_forms(description: &str, max_len: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    description
        .lines()
        .filter(|line| !line.trim().is_empty() && line.chars().count() < max_len)
        .map(strip_markup)
        .filter(|form| !form.is_empty() && seen.insert(form.clone()))
        .collect()
}

pub struct DocumentTable<'a> {
    config: &'a RetrievalConfig,
}

impl<'a> DocumentTable<'a> {
    pub fn new(config: &'a RetrievalConfig) -> Self {
        Self { config }
    }

    fn header(&self) -> String {
        let mut out = String::from(
            "<table><tr><th>Sélection</th><th>Titre</th><th>Date</th><th>Résumé</th><th>Source</th><th>Illustration</th>",
        );
        for field in FIELDS {
            out.push_str(&format!("<th>✨{} (généré par IA)</th>", field.label));
        }
        out.push_str("</tr>\n");
        out
    }

    fn cell(&self, text: &str) -> String {
        let flat = strip_markup(text);
        if flat.is_empty() {
            return "...".to_string();
        }
        escape(&truncate_chars(&flat, self.config.table_cells_maxchars))
    }

    /// One row for a parsed source document.
    pub fn row(&self, path: &Path, doc: &Document) -> String {
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut out = String::from("<tr>");
        out.push_str(&format!(
            "<td><input type=\"checkbox\" id=\"{}\" onchange=\"append_docs(this)\" ></td>",
            escape(&id)
        ));
        out.push_str(&format!("<td>{}</td>", self.cell(doc.title())));
        out.push_str(&format!("<td>{}</td>", doc.date_label()));
        out.push_str(&format!("<td>{}</td>", self.cell(doc.summary())));
        match link_host(doc.link()) {
            Some(host) => out.push_str(&format!(
                "<td><a href=\"{}\">{}</a></td>",
                escape(doc.link()),
                escape(&host)
            )),
            None => out.push_str("<td>...</td>"),
        }
        out.push_str(&format!("<td>{}</td>", self.cell(doc.caption())));
        for field in FIELDS {
            let annotation = std::fs::read_to_string(sidecar_path(path, field)).unwrap_or_default();
            out.push_str(&format!("<td>{}</td>", annotation));
        }
        out.push_str("</tr>\n");
        out
    }

    /// Render the distinct sources of `hits`, skipping unreadable ones.
    pub fn render(&self, hits: &[SearchHit]) -> String {
        let mut out = self.header();
        for path in distinct_sources(hits) {
            match corpus::read_document(&path) {
                Ok(doc) => out.push_str(&self.row(&path, &doc)),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable hit"),
            }
        }
        out.push_str("</table>\n");
        out
    }
}

pub struct EntityTable<'a> {
    config: &'a RetrievalConfig,
    entities: &'a EntityCorpus,
}

impl<'a> EntityTable<'a> {
    pub fn new(config: &'a RetrievalConfig, entities: &'a EntityCorpus) -> Self {
        Self { config, entities }
    }

    /// Render at most `max_displayed_concepts` non-empty entity rows, in
    /// hit order. Hits for an entity already rendered, or whose path no
    /// longer resolves to its id, are skipped.
    pub fn render(&self, hits: &[SearchHit]) -> String {
        let mut out =
            String::from("<table><tr><th>sélection</th><th>entité</th><th>description</th></tr>\n");
        let mut rendered = 0;
        let mut seen = HashSet::new();

        for hit in hits {
            if rendered >= self.config.max_displayed_concepts {
                break;
            }
            let Some(id) = self.entities.id_for_path(&hit.source_path) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            if !self.is_current(id, &hit.source_path) {
                debug!(path = %hit.source_path.display(), "skipping stale entity hit");
                continue;
            }
            let forms = entity_forms(&hit.text, self.config.max_concept_desc_len);
            let Some(primary) = forms.first() else {
                continue;
            };
            let detail = forms.iter().map(|f| escape(f)).collect::<Vec<_>>().join(" ; ");
            out.push_str(&format!(
                "<tr><td><input type=\"checkbox\" id=\"{}\" onchange=\"append_query(this)\" ></td><td><b>{}</b></td><td>{}</td></tr>",
                id,
                escape(primary),
                detail
            ));
            rendered += 1;
        }

        out.push_str("</table>\n");
        out
    }

    /// The indexed file still exists and is the one `id` resolves to now.
    fn is_current(&self, id: EntityId, source: &Path) -> bool {
        source.is_file()
            && self
                .entities
                .resolve(id)
                .is_ok_and(|resolved| resolved == source)
    }
}

/// Searches both indexes through whichever stores are open.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    documents: Option<Arc<dyn VectorStore>>,
    entity_index: Option<Arc<dyn VectorStore>>,
    entities: Arc<EntityCorpus>,
    expander: QueryExpander,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        documents: Option<Arc<dyn VectorStore>>,
        entity_index: Option<Arc<dyn VectorStore>>,
        entities: Arc<EntityCorpus>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            documents,
            entity_index,
            expander: QueryExpander::new(Arc::clone(&entities)),
            entities,
            config,
        }
    }

    fn store(&self, corpus: Corpus) -> Result<&Arc<dyn VectorStore>> {
        let store = match corpus {
            Corpus::Documents => self.documents.as_ref(),
            Corpus::Entities => self.entity_index.as_ref(),
        };
        store.ok_or_else(|| anyhow::anyhow!("The {} index is not open", corpus.label()))
    }

    /// Embed `query` and fetch the top-k hits from `corpus`.
    pub async fn hits(&self, query: &str, corpus: Corpus) -> Result<Vec<SearchHit>> {
        let store = self.store(corpus)?;
        let vector = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;
        store.search(&vector, self.config.span_top_k).await
    }

    /// Search documents. Free-text queries are entity-expanded first;
    /// file-content queries are used verbatim.
    pub async fn search(&self, query: &str, query_is_file: bool) -> Result<String> {
        let query = if query_is_file {
            query.to_string()
        } else {
            self.expander.expand(query)?
        };
        let hits = self.hits(&query, Corpus::Documents).await?;
        Ok(DocumentTable::new(&self.config).render(&hits))
    }

    /// Search entities with the raw query.
    pub async fn extend(&self, query: &str) -> Result<String> {
        let hits = self.hits(query, Corpus::Entities).await?;
        Ok(EntityTable::new(&self.config, &self.entities).render(&hits))
    }

    pub fn expander(&self) -> &QueryExpander {
        &self.expander
    }
}
