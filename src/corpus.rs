//! Document corpus on disk.
//!
//! Each feed entry becomes one XML file at
//! `{root}/{year}/{month}/{day}/{hour}/{encoded_id}.xml`, where the
//! encoded id is the last 30 characters of the URL-safe base64 encoding of
//! the entry id. Files are created with `create_new`, so ingesting the same
//! feed twice never duplicates or overwrites a document.
//!
//! # Example
//!
//! ```text
//! $ nrag ingest
//! ingest
//!   feeds: 3 (0 failed)
//!   entries seen: 124
//!   documents created: 17
//!   already present: 107
//!   skipped: 0
//! ok
//! ```

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::SkipReason;
use crate::feed;
use crate::models::{Document, FeedEntry, PublishedDate};

/// Number of trailing base64 characters kept in a document filename.
pub const ENCODED_ID_LEN: usize = 30;

/// Filename for an entry id: trailing [`ENCODED_ID_LEN`] characters of its
/// padded URL-safe base64 encoding, plus `.xml`.
pub fn encoded_filename(id: &str) -> String {
    let encoded = URL_SAFE.encode(id.as_bytes());
    let start = encoded.len().saturating_sub(ENCODED_ID_LEN);
    format!("{}.xml", &encoded[start..])
}

/// Directory for a date: `{root}/{year}/{month}/{day}/{hour}`.
pub fn date_dir(root: &Path, date: &PublishedDate) -> PathBuf {
    root.join(date.year.to_string())
        .join(date.month.to_string())
        .join(date.day.to_string())
        .join(date.hour.to_string())
}

/// Full on-disk path for a dated document.
pub fn document_path(root: &Path, doc: &Document) -> Option<PathBuf> {
    doc.date()
        .map(|date| date_dir(root, &date).join(encoded_filename(doc.id())))
}

/// Serialize a document to the corpus XML format.
pub fn to_xml(doc: &Document) -> Result<String> {
    let mut writer = quick_xml::Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("article")))?;

    write_text_element(&mut writer, "id", doc.id())?;
    write_text_element(&mut writer, "title", doc.title())?;
    write_text_element(&mut writer, "link", doc.link())?;
    write_text_element(&mut writer, "summary", doc.summary())?;
    write_text_element(&mut writer, "published", doc.published())?;
    if let Some(date) = doc.date() {
        writer.write_event(Event::Start(BytesStart::new("published_parsed")))?;
        write_text_element(&mut writer, "year", &date.year.to_string())?;
        write_text_element(&mut writer, "month", &date.month.to_string())?;
        write_text_element(&mut writer, "day", &date.day.to_string())?;
        write_text_element(&mut writer, "hour", &date.hour.to_string())?;
        writer.write_event(Event::End(BytesEnd::new("published_parsed")))?;
    }
    write_text_element(&mut writer, "caption", doc.caption())?;
    write_text_element(&mut writer, "body", doc.body())?;

    writer.write_event(Event::End(BytesEnd::new("article")))?;
    let bytes = writer.into_inner();
    Ok(String::from_utf8(bytes)?)
}

fn write_text_element(
    writer: &mut quick_xml::Writer<Vec<u8>>,
    name: &str,
    text: &str,
) -> Result<()> {
    if text.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new(name)))?;
    } else {
        writer.write_event(Event::Start(BytesStart::new(name)))?;
        writer.write_event(Event::Text(BytesText::new(text)))?;
        writer.write_event(Event::End(BytesEnd::new(name)))?;
    }
    Ok(())
}

/// Parse a corpus file into a [`Document`].
///
/// Unknown elements are ignored and missing ones read back empty. The
/// parsed date is only present when all four components are valid.
pub fn parse_xml(xml: &[u8]) -> Result<Document> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut saw_root = false;
    let mut doc = Document {
        id: String::new(),
        title: String::new(),
        link: String::new(),
        summary: String::new(),
        published: String::new(),
        date: None,
        caption: String::new(),
        body: String::new(),
    };
    let mut parts: [Option<String>; 4] = Default::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if path.is_empty() {
                    if name != "article" {
                        bail!("Root element is <{}>, expected <article>", name);
                    }
                    saw_root = true;
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::Text(t)) => {
                let value = t
                    .unescape()
                    .map_err(|e| anyhow::anyhow!("Invalid text in document: {}", e))?;
                text.push_str(&value);
            }
            Ok(Event::CData(c)) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(_)) => {
                let value = std::mem::take(&mut text);
                let segments: Vec<&str> = path.iter().map(String::as_str).collect();
                match segments.as_slice() {
                    ["article", "id"] => doc.id = value,
                    ["article", "title"] => doc.title = value,
                    ["article", "link"] => doc.link = value,
                    ["article", "summary"] => doc.summary = value,
                    ["article", "published"] => doc.published = value,
                    ["article", "caption"] => doc.caption = value,
                    ["article", "body"] => doc.body = value,
                    ["article", "published_parsed", part] => {
                        let slot = match *part {
                            "year" => Some(0),
                            "month" => Some(1),
                            "day" => Some(2),
                            "hour" => Some(3),
                            _ => None,
                        };
                        if let Some(i) = slot {
                            parts[i] = Some(value);
                        }
                    }
                    _ => {}
                }
                path.pop();
            }
            Ok(Event::Empty(e)) => {
                if path.is_empty() && e.local_name().as_ref() == b"article" {
                    saw_root = true;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!(
                "Malformed document XML at position {}: {}",
                reader.buffer_position(),
                e
            ),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        bail!("Document has no <article> element");
    }
    doc.date = parse_date_parts(&parts);
    Ok(doc)
}

fn parse_date_parts(parts: &[Option<String>; 4]) -> Option<PublishedDate> {
    let [year, month, day, hour] = parts;
    Some(PublishedDate {
        year: year.as_deref()?.trim().parse().ok()?,
        month: month.as_deref()?.trim().parse().ok()?,
        day: day.as_deref()?.trim().parse().ok()?,
        hour: hour.as_deref()?.trim().parse().ok()?,
    })
}

/// Read and parse a corpus file.
pub fn read_document(path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read document {}", path.display()))?;
    parse_xml(&bytes).with_context(|| format!("Failed to parse document {}", path.display()))
}

/// Result of ingesting one feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Created(PathBuf),
    Skipped(SkipReason),
}

/// Aggregated result of one ingestion run.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    pub feeds: usize,
    pub feeds_failed: usize,
    pub entries_seen: usize,
    pub created: usize,
    pub already_present: usize,
    pub skipped: Vec<SkipReason>,
}

impl IngestReport {
    fn record(&mut self, outcome: IngestOutcome) {
        self.entries_seen += 1;
        match outcome {
            IngestOutcome::Created(_) => self.created += 1,
            IngestOutcome::Skipped(SkipReason::AlreadyExists) => self.already_present += 1,
            IngestOutcome::Skipped(reason) => self.skipped.push(reason),
        }
    }
}

/// Writes feed entries into the document root.
pub struct CorpusBuilder {
    root: PathBuf,
    client: reqwest::Client,
}

impl CorpusBuilder {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            root: config.paths.document_root.clone(),
            client: feed::http_client(config.generation.request_timeout_secs)?,
        })
    }

    pub fn with_client(root: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            root: root.into(),
            client,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fetch every feed in the list and write the entries that are not yet
    /// on disk. Only an unreadable feed list is an error; individual feeds
    /// and entries that fail are counted and skipped.
    pub async fn ingest_feeds(&self, feed_list: &Path) -> Result<IngestReport> {
        let urls = feed::read_feed_list(feed_list)?;
        let mut report = IngestReport::default();

        for url in urls {
            report.feeds += 1;
            let bytes = match feed::fetch_feed(&self.client, &url).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(feed = %url, error = %e, "skipping unreachable feed");
                    report.feeds_failed += 1;
                    continue;
                }
            };
            let entries = match feed::parse_feed(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(feed = %url, error = %e, "skipping unparsable feed");
                    report.feeds_failed += 1;
                    continue;
                }
            };
            for entry in entries {
                let outcome = match entry {
                    Ok(entry) => self.ingest_entry(&entry),
                    Err(reason) => IngestOutcome::Skipped(reason),
                };
                if let IngestOutcome::Skipped(reason) = &outcome {
                    if *reason != SkipReason::AlreadyExists {
                        debug!(feed = %url, reason = %reason, "entry skipped");
                    }
                }
                report.record(outcome);
            }
        }

        info!(
            created = report.created,
            already_present = report.already_present,
            "feed ingestion finished"
        );
        Ok(report)
    }

    /// Write one entry if its file does not exist yet.
    pub fn ingest_entry(&self, entry: &FeedEntry) -> IngestOutcome {
        let Some(doc) = Document::from_entry(entry) else {
            return IngestOutcome::Skipped(SkipReason::MissingDate);
        };
        match self.write_document(&doc) {
            Ok(path) => IngestOutcome::Created(path),
            Err(reason) => IngestOutcome::Skipped(reason),
        }
    }

    fn write_document(&self, doc: &Document) -> std::result::Result<PathBuf, SkipReason> {
        let path = document_path(&self.root, doc).ok_or(SkipReason::MissingDate)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let xml = to_xml(doc).map_err(|e| SkipReason::Parse(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(xml.as_bytes())?;
        Ok(path)
    }
}
