//! Syndication feed fetching and parsing.
//!
//! Feeds are listed one URL per line in the configured feed list. Both RSS
//! 2.0 `<item>` and Atom `<entry>` elements are recognised. Each entry is
//! returned as an explicit `Result`: entries lacking an id or a parseable
//! date come back as a [`SkipReason`] so the caller can count them.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SkipReason;
use crate::models::FeedEntry;

/// Read the feed list: one URL per line, blank lines and `#` comments ignored.
pub fn read_feed_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read feed list: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Where a feed's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    Http(String),
    File(PathBuf),
}

impl FeedSource {
    pub fn parse(url: &str) -> Self {
        if url.starts_with("http://") || url.starts_with("https://") {
            FeedSource::Http(url.to_string())
        } else if let Some(path) = url.strip_prefix("file://") {
            FeedSource::File(PathBuf::from(path))
        } else {
            FeedSource::File(PathBuf::from(url))
        }
    }
}

/// HTTP client used for every feed fetch of one ingestion run.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("newsrag/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

pub async fn fetch_feed(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    match FeedSource::parse(url) {
        FeedSource::Http(url) => {
            let response = client
                .get(&url)
                .send()
                .await
                .with_context(|| format!("Failed to fetch feed {}", url))?;
            let status = response.status();
            if !status.is_success() {
                bail!("Feed {} returned HTTP {}", url, status);
            }
            Ok(response.bytes().await?.to_vec())
        }
        FeedSource::File(path) => tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read feed file {}", path.display())),
    }
}

const ITEM_TAGS: &[&[u8]] = &[b"item", b"entry"];

/// Parse RSS or Atom bytes into entries.
///
/// Malformed XML fails the whole feed; per-entry problems are returned
/// inline.
pub fn parse_feed(xml: &[u8]) -> Result<Vec<Result<FeedEntry, SkipReason>>> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut entries = Vec::new();
    let mut current: Option<EntryFields> = None;
    // Open elements below the current item, innermost last.
    let mut stack: Vec<(String, String)> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = qualified_name(&e);
                if current.is_none() {
                    if ITEM_TAGS.contains(&e.local_name().as_ref()) {
                        current = Some(EntryFields::default());
                        stack.clear();
                    }
                } else if let Some(fields) = current.as_mut() {
                    fields.absorb_attributes(&name, &e);
                    stack.push((name, String::new()));
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(fields) = current.as_mut() {
                    let name = qualified_name(&e);
                    fields.absorb_attributes(&name, &e);
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((_, text)) = stack.last_mut() {
                    let value = t
                        .unescape()
                        .map_err(|e| anyhow::anyhow!("Invalid text in feed: {}", e))?;
                    text.push_str(&value);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((_, text)) = stack.last_mut() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                if current.is_some() && stack.is_empty() {
                    if ITEM_TAGS.contains(&e.local_name().as_ref()) {
                        if let Some(fields) = current.take() {
                            entries.push(fields.into_entry());
                        }
                    }
                } else if let Some((name, text)) = stack.pop() {
                    if let Some(fields) = current.as_mut() {
                        fields.set_text(name, text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!(
                "Malformed feed XML at position {}: {}",
                reader.buffer_position(),
                e
            ),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Text and attribute values collected for one item, first value wins.
#[derive(Default)]
struct EntryFields {
    text: HashMap<String, String>,
    link_href: Option<String>,
    media_url: Option<String>,
}

impl EntryFields {
    fn set_text(&mut self, name: String, text: String) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        self.text
            .entry(name)
            .or_insert_with(|| trimmed.to_string());
    }

    fn absorb_attributes(&mut self, name: &str, e: &BytesStart<'_>) {
        let attr = |key: &[u8]| -> Option<String> {
            e.attributes()
                .flatten()
                .find(|a| a.key.as_ref() == key)
                .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
        };
        match name {
            "link" => {
                let rel = attr(b"rel");
                if self.link_href.is_none() && matches!(rel.as_deref(), None | Some("alternate")) {
                    self.link_href = attr(b"href");
                }
            }
            "enclosure" | "media:content" | "media:thumbnail" => {
                if self.media_url.is_none() {
                    self.media_url = attr(b"url");
                }
            }
            _ => {}
        }
    }

    fn first(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|n| self.text.get(*n).cloned())
    }

    fn into_entry(self) -> Result<FeedEntry, SkipReason> {
        let link = self
            .first(&["link"])
            .or_else(|| self.link_href.clone())
            .unwrap_or_default();
        let id = self
            .first(&["guid", "id"])
            .or_else(|| (!link.is_empty()).then(|| link.clone()))
            .ok_or(SkipReason::MissingId)?;
        let published = self
            .first(&["pubDate", "published", "updated", "dc:date"])
            .ok_or(SkipReason::MissingDate)?;
        let published_at = Some(parse_date(&published).ok_or(SkipReason::MissingDate)?);
        let caption = self
            .first(&["media:description", "media:title"])
            .or_else(|| self.media_url.clone())
            .unwrap_or_default();

        Ok(FeedEntry {
            id,
            title: self.first(&["title"]).unwrap_or_default(),
            link,
            summary: self.first(&["description", "summary"]).unwrap_or_default(),
            published,
            published_at,
            caption,
            body: self.first(&["content:encoded", "content"]).unwrap_or_default(),
        })
    }
}

/// Parse an RFC 2822 (RSS) or RFC 3339 (Atom) date into UTC.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Channel title</title>
    <link>https://news.example.com</link>
    <item>
      <title>Inflation &amp; taux</title>
      <link>https://news.example.com/a1</link>
      <guid isPermaLink="false">urn:news:a1</guid>
      <description><![CDATA[<p>La BCE maintient ses taux.</p>]]></description>
      <pubDate>Sat, 09 Nov 2024 17:30:00 +0100</pubDate>
      <media:content url="https://img.example.com/1.jpg">
        <media:description>Christine Lagarde</media:description>
      </media:content>
      <content:encoded>Full body</content:encoded>
    </item>
    <item>
      <title>No date</title>
      <link>https://news.example.com/a2</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom feed</title>
  <entry>
    <title>Atom entry</title>
    <link rel="alternate" href="https://blog.example.org/post"/>
    <id>tag:blog.example.org,2024:1</id>
    <updated>2024-03-05T08:15:00Z</updated>
    <summary>Short summary</summary>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);

        let first = entries[0].as_ref().unwrap();
        assert_eq!(first.id, "urn:news:a1");
        assert_eq!(first.title, "Inflation & taux");
        assert_eq!(first.link, "https://news.example.com/a1");
        assert_eq!(first.summary, "<p>La BCE maintient ses taux.</p>");
        assert_eq!(first.caption, "Christine Lagarde");
        assert_eq!(first.body, "Full body");
        let at = first.published_at.unwrap();
        assert_eq!((at.year(), at.month(), at.day(), at.hour()), (2024, 11, 9, 16));

        assert_eq!(entries[1].as_ref().unwrap_err(), &SkipReason::MissingDate);
    }

    #[test]
    fn channel_fields_are_not_entries() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();
        assert!(entries
            .iter()
            .flatten()
            .all(|e| e.title != "Channel title"));
    }

    #[test]
    fn parses_atom_entries() {
        let entries = parse_feed(ATOM.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = entries[0].as_ref().unwrap();
        assert_eq!(entry.id, "tag:blog.example.org,2024:1");
        assert_eq!(entry.link, "https://blog.example.org/post");
        assert_eq!(entry.summary, "Short summary");
        assert_eq!(entry.published_at.unwrap().hour(), 8);
    }

    #[test]
    fn link_used_as_id_fallback() {
        let xml = r#"<rss><channel><item>
            <link>https://x.example/1</link>
            <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
        </item></channel></rss>"#;
        let entries = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(entries[0].as_ref().unwrap().id, "https://x.example/1");
    }

    #[test]
    fn entry_without_id_or_link_is_skipped() {
        let xml = r#"<rss><channel><item>
            <title>Orphan</title>
            <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
        </item></channel></rss>"#;
        let entries = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(entries[0].as_ref().unwrap_err(), &SkipReason::MissingId);
    }

    #[test]
    fn enclosure_url_is_caption_fallback() {
        let xml = r#"<rss><channel><item>
            <guid>g1</guid>
            <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
            <enclosure url="https://img.example/a.png" type="image/png"/>
        </item></channel></rss>"#;
        let entries = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(entries[0].as_ref().unwrap().caption, "https://img.example/a.png");
    }

    #[test]
    fn malformed_xml_fails_the_feed() {
        assert!(parse_feed(b"<rss><channel><item><title>x</item></rss>").is_err());
    }

    #[test]
    fn feed_list_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.txt");
        std::fs::write(&path, "# comment\n\nhttps://a.example/rss\n  file:///tmp/f.xml  \n").unwrap();
        let urls = read_feed_list(&path).unwrap();
        assert_eq!(urls, vec!["https://a.example/rss", "file:///tmp/f.xml"]);
    }

    #[test]
    fn source_kinds() {
        assert_eq!(
            FeedSource::parse("https://a.example/rss"),
            FeedSource::Http("https://a.example/rss".into())
        );
        assert_eq!(
            FeedSource::parse("file:///tmp/f.xml"),
            FeedSource::File(PathBuf::from("/tmp/f.xml"))
        );
        assert_eq!(
            FeedSource::parse("feeds/local.xml"),
            FeedSource::File(PathBuf::from("feeds/local.xml"))
        );
    }
}
