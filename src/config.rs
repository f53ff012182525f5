//! TOML configuration.
//!
//! A single [`Config`] is loaded once by [`load_config`] and handed by
//! reference to every component. Every key the pipeline relies on is
//! required; only transport tuning (batch size, retries, timeouts for the
//! embedding client) carries a default.
//!
//! ```toml
//! [paths]
//! feed_list = "./config/feeds.txt"
//! document_root = "./data/news"
//! document_index = "./data/news.sqlite"
//! entity_root = "./data/wiki"
//! entity_index = "./data/wiki.sqlite"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [generation]
//! provider = "ollama"
//! model = "mistral"
//! request_timeout_secs = 120
//!
//! [chat]
//! token_limit = 3000
//!
//! [annotation]
//! input_token_limit = 2000
//!
//! [indexing]
//! doc_limit = 0
//! num_workers = 8
//! span_max_tokens = 256
//!
//! [retrieval]
//! span_top_k = 10
//! table_cells_maxchars = 300
//! max_displayed_concepts = 10
//! max_concept_desc_len = 120
//!
//! [entities]
//! max_filename_len = 50
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub chat: ChatConfig,
    pub annotation: AnnotationConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub entities: EntitiesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Text file with one feed URL per line.
    pub feed_list: PathBuf,
    pub document_root: PathBuf,
    pub document_index: PathBuf,
    pub entity_root: PathBuf,
    pub entity_index: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `ollama`, `openai`, `local` or `hashing`.
    pub provider: String,
    pub model: String,
    pub dims: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    pub provider: String,
    pub model: String,
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Token budget for the conversation history kept in memory.
    pub token_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnnotationConfig {
    /// Document text is cut to this many tokens before prompting.
    pub input_token_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Maximum number of documents loaded per reindex; `0` means unbounded.
    pub doc_limit: usize,
    pub num_workers: usize,
    pub span_max_tokens: usize,
}

impl IndexingConfig {
    pub fn doc_cap(&self) -> Option<usize> {
        (self.doc_limit > 0).then_some(self.doc_limit)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    pub span_top_k: usize,
    pub table_cells_maxchars: usize,
    pub max_displayed_concepts: usize,
    pub max_concept_desc_len: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EntitiesConfig {
    pub max_filename_len: usize,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.embedding.provider.as_str() {
        "ollama" | "openai" | "local" | "hashing" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be ollama, openai, local, or hashing.",
            other
        ),
    }
    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must not be empty");
    }
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.generation.provider.as_str() {
        "ollama" => {}
        other => bail!("Unknown generation provider: '{}'. Must be ollama.", other),
    }
    if config.generation.model.trim().is_empty() {
        bail!("generation.model must not be empty");
    }
    if config.generation.request_timeout_secs == 0 {
        bail!("generation.request_timeout_secs must be > 0");
    }

    if config.chat.token_limit == 0 {
        bail!("chat.token_limit must be > 0");
    }
    if config.annotation.input_token_limit == 0 {
        bail!("annotation.input_token_limit must be > 0");
    }
    if config.indexing.num_workers == 0 {
        bail!("indexing.num_workers must be > 0");
    }
    if config.indexing.span_max_tokens == 0 {
        bail!("indexing.span_max_tokens must be > 0");
    }
    if config.retrieval.span_top_k == 0 {
        bail!("retrieval.span_top_k must be > 0");
    }
    if config.retrieval.table_cells_maxchars == 0 {
        bail!("retrieval.table_cells_maxchars must be > 0");
    }
    if config.entities.max_filename_len == 0 {
        bail!("entities.max_filename_len must be > 0");
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const SAMPLE: &str = r#"
[paths]
feed_list = "feeds.txt"
document_root = "news"
document_index = "news.sqlite"
entity_root = "wiki"
entity_index = "wiki.sqlite"

[embedding]
provider = "hashing"
model = "bow"
dims = 64

[generation]
provider = "ollama"
model = "mistral"
request_timeout_secs = 60

[chat]
token_limit = 500

[annotation]
input_token_limit = 1000

[indexing]
doc_limit = 0
num_workers = 4
span_max_tokens = 128

[retrieval]
span_top_k = 5
table_cells_maxchars = 200
max_displayed_concepts = 3
max_concept_desc_len = 80

[entities]
max_filename_len = 50
"#;

    pub(crate) fn sample_config() -> Config {
        toml::from_str(SAMPLE).expect("sample config parses")
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_sample() {
        let file = write_config(SAMPLE);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.embedding.max_retries, 5);
        assert_eq!(config.retrieval.max_displayed_concepts, 3);
        assert_eq!(config.indexing.doc_cap(), None);
    }

    #[test]
    fn doc_limit_caps_when_positive() {
        let mut config = sample_config();
        config.indexing.doc_limit = 12;
        assert_eq!(config.indexing.doc_cap(), Some(12));
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let content = SAMPLE.replace("span_top_k = 5\n", "");
        let file = write_config(&content);
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn unknown_embedding_provider_is_rejected() {
        let content = SAMPLE.replace("provider = \"hashing\"", "provider = \"magic\"");
        let file = write_config(&content);
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let content = SAMPLE.replace("num_workers = 4", "num_workers = 0");
        let file = write_config(&content);
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("num_workers"));
    }
}
