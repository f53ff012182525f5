//! Core data types flowing through the pipeline.
//!
//! Feed entries are ephemeral. [`Document`]s are the persisted article
//! records read back from the corpus. [`VectorRecord`]s are what the
//! indexer inserts into either vector store.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::Regex;

use crate::error::ScopeError;

/// Entity reference token: `c` followed by digits.
static ENTITY_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^c[0-9]+$").unwrap());

/// Raw item produced by the feed parser before it is written to disk.
#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub link: String,
    pub summary: String,
    /// Date string as it appeared in the feed.
    pub published: String,
    pub published_at: Option<DateTime<Utc>>,
    pub caption: String,
    pub body: String,
}

/// Date components used for the corpus directory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl PublishedDate {
    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
        }
    }

    /// `day/month/year`, as rendered in result tables.
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.day, self.month, self.year)
    }
}

/// A persisted news article.
///
/// Built either from a [`FeedEntry`] at ingest time or by parsing a corpus
/// file. All fields are read through accessors; a file that lacks a field
/// reads it back as empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) link: String,
    pub(crate) summary: String,
    pub(crate) published: String,
    pub(crate) date: Option<PublishedDate>,
    pub(crate) caption: String,
    pub(crate) body: String,
}

impl Document {
    /// Returns `None` when the entry has no usable date.
    pub fn from_entry(entry: &FeedEntry) -> Option<Self> {
        let date = entry.published_at.as_ref().map(PublishedDate::from_datetime)?;
        Some(Self {
            id: entry.id.clone(),
            title: entry.title.clone(),
            link: entry.link.clone(),
            summary: entry.summary.clone(),
            published: entry.published.clone(),
            date: Some(date),
            caption: entry.caption.clone(),
            body: entry.body.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn published(&self) -> &str {
        &self.published
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn date(&self) -> Option<PublishedDate> {
        self.date
    }

    pub fn year(&self) -> Option<i32> {
        self.date.map(|d| d.year)
    }

    pub fn month(&self) -> Option<u32> {
        self.date.map(|d| d.month)
    }

    pub fn day(&self) -> Option<u32> {
        self.date.map(|d| d.day)
    }

    pub fn hour(&self) -> Option<u32> {
        self.date.map(|d| d.hour)
    }

    /// `day/month/year`, or `...` when the file carries no parsed date.
    pub fn date_label(&self) -> String {
        self.date.map(|d| d.label()).unwrap_or_else(|| "...".to_string())
    }

    /// Every non-empty text node of the record in file order, joined by
    /// newlines.
    pub fn plain_text(&self) -> String {
        let date_parts: Vec<String> = match self.date {
            Some(d) => vec![
                d.year.to_string(),
                d.month.to_string(),
                d.day.to_string(),
                d.hour.to_string(),
            ],
            None => Vec::new(),
        };
        let mut parts: Vec<&str> = vec![
            &self.id,
            &self.title,
            &self.link,
            &self.summary,
            &self.published,
        ];
        parts.extend(date_parts.iter().map(String::as_str));
        parts.push(&self.caption);
        parts.push(&self.body);
        parts
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One `{name, description}` pair extracted by the annotation model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedEntity {
    pub name: String,
    /// `None` when the model produced a non-string description.
    pub description: Option<String>,
}

/// Sequential entity identifier, rendered as the query token `c{n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Whether a whitespace-delimited query token is an entity reference.
    pub fn is_token(token: &str) -> bool {
        ENTITY_TOKEN.is_match(token)
    }

    /// Parse a `c{digits}` token. Leading zeros are accepted (`c0001` is 1).
    pub fn parse_token(token: &str) -> Option<Self> {
        if !Self::is_token(token) {
            return None;
        }
        token[1..].parse::<u64>().ok().map(EntityId)
    }

    /// Relative directory for this id: one level per decimal digit.
    pub fn shallow_path(&self) -> PathBuf {
        self.0
            .to_string()
            .chars()
            .map(|c| c.to_string())
            .collect()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Which corpus a vector record was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMarker {
    Document,
    Entity,
}

impl RecordMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordMarker::Document => "document",
            RecordMarker::Entity => "entity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(RecordMarker::Document),
            "entity" => Some(RecordMarker::Entity),
            _ => None,
        }
    }
}

/// An embedded span plus the metadata needed to join it back to its source.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub source_path: PathBuf,
    pub span_index: usize,
    pub text: String,
    pub marker: RecordMarker,
    pub vector: Vec<f32>,
}

/// One of the two corpora (and their indexes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corpus {
    Documents,
    Entities,
}

impl Corpus {
    pub fn label(&self) -> &'static str {
        match self {
            Corpus::Documents => "documents",
            Corpus::Entities => "entities",
        }
    }

    pub fn marker(&self) -> RecordMarker {
        match self {
            Corpus::Documents => RecordMarker::Document,
            Corpus::Entities => RecordMarker::Entity,
        }
    }
}

/// Reindex scope chosen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexScope {
    Documents,
    Entities,
    Both,
}

impl IndexScope {
    pub fn includes(&self, corpus: Corpus) -> bool {
        matches!(
            (self, corpus),
            (IndexScope::Both, _)
                | (IndexScope::Documents, Corpus::Documents)
                | (IndexScope::Entities, Corpus::Entities)
        )
    }
}

impl FromStr for IndexScope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "documents" | "news" => Ok(IndexScope::Documents),
            "entities" | "wiki" => Ok(IndexScope::Entities),
            "both" => Ok(IndexScope::Both),
            _ => Err(ScopeError::Unknown(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entity_token_pattern() {
        assert!(EntityId::is_token("c0001"));
        assert!(EntityId::is_token("c7"));
        assert!(!EntityId::is_token("c"));
        assert!(!EntityId::is_token("C12"));
        assert!(!EntityId::is_token("c12a"));
        assert!(!EntityId::is_token("inflation"));
    }

    #[test]
    fn parse_token_drops_leading_zeros() {
        assert_eq!(EntityId::parse_token("c0001"), Some(EntityId(1)));
        assert_eq!(EntityId::parse_token("c42"), Some(EntityId(42)));
        assert_eq!(EntityId::parse_token("x42"), None);
        assert_eq!(EntityId(1).to_string(), "c1");
    }

    #[test]
    fn shallow_path_one_level_per_digit() {
        assert_eq!(EntityId(123).shallow_path(), PathBuf::from("1/2/3"));
        assert_eq!(EntityId(0).shallow_path(), PathBuf::from("0"));
    }

    #[test]
    fn scope_parsing() {
        assert_eq!("documents".parse::<IndexScope>(), Ok(IndexScope::Documents));
        assert_eq!("NEWS".parse::<IndexScope>(), Ok(IndexScope::Documents));
        assert_eq!("wiki".parse::<IndexScope>(), Ok(IndexScope::Entities));
        assert_eq!("BOTH".parse::<IndexScope>(), Ok(IndexScope::Both));
        assert_eq!(
            "EP".parse::<IndexScope>(),
            Err(ScopeError::Unknown("EP".to_string()))
        );
    }

    #[test]
    fn scope_includes() {
        assert!(IndexScope::Both.includes(Corpus::Entities));
        assert!(IndexScope::Documents.includes(Corpus::Documents));
        assert!(!IndexScope::Documents.includes(Corpus::Entities));
    }

    #[test]
    fn document_from_entry_requires_date() {
        let mut entry = FeedEntry {
            id: "https://example.com/a".into(),
            title: "Title".into(),
            ..Default::default()
        };
        assert!(Document::from_entry(&entry).is_none());

        entry.published_at = Some(Utc.with_ymd_and_hms(2024, 11, 9, 17, 5, 0).unwrap());
        let doc = Document::from_entry(&entry).unwrap();
        assert_eq!(doc.day(), Some(9));
        assert_eq!(doc.date_label(), "9/11/2024");
    }

    #[test]
    fn plain_text_skips_empty_fields() {
        let entry = FeedEntry {
            id: "id-1".into(),
            title: "Title".into(),
            body: "Body text".into(),
            published_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap()),
            ..Default::default()
        };
        let doc = Document::from_entry(&entry).unwrap();
        assert_eq!(doc.plain_text(), "id-1\nTitle\n2024\n1\n2\n3\nBody text");
    }
}
