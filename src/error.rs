//! Failure taxonomy for the pipeline.
//!
//! Most fallible code returns `anyhow::Result`. The types here classify the
//! failures whose handling policy differs: configuration errors abort before
//! any storage is touched, per-item [`SkipReason`]s are aggregated into
//! reports and never abort a run, and [`ExpansionError`]s always propagate.

use thiserror::Error;

/// A corpus / index name that is not one of the accepted values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("'{0}' is not a valid index name. Accepted values: documents, entities, both (or news, wiki)")]
    Unknown(String),
}

/// Why a single item was skipped during ingestion, annotation, or
/// materialization. Skips are reported, not raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("file already exists")]
    AlreadyExists,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("entry has no usable published date")]
    MissingDate,

    #[error("entry has no id or link")]
    MissingId,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("document has no text")]
    EmptyText,

    #[error("entity name is empty after sanitizing")]
    EmptyName,

    #[error("entity filename is {len} characters, limit is {limit}")]
    NameTooLong { len: usize, limit: usize },

    #[error("generation failed: {0}")]
    Generation(String),
}

impl From<std::io::Error> for SkipReason {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::AlreadyExists {
            SkipReason::AlreadyExists
        } else {
            SkipReason::Io(err.to_string())
        }
    }
}

/// Query expansion failures. These are never tolerated: an expanded query
/// with missing entity content would silently degrade relevance.
#[derive(Error, Debug)]
pub enum ExpansionError {
    #[error("unknown entity '{0}': no description file under its id directory")]
    UnknownEntity(String),

    #[error("entity '{id}' resolves to {count} files; expected exactly one")]
    Ambiguous { id: String, count: usize },

    #[error("failed to read entity '{id}': {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },
}
