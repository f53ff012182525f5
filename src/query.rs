//! Query rewriting around entity reference tokens (`c{n}`).
//!
//! [`QueryExpander::filter`] drops reference tokens (used before chat).
//! [`QueryExpander::expand`] drops them and appends each referenced
//! entity's stored description, producing a richer retrieval query. An
//! entity that cannot be loaded fails the expansion.

use regex::Regex;
use std::borrow::Cow;
use std::sync::{Arc, LazyLock};

use crate::entities::EntityCorpus;
use crate::error::ExpansionError;
use crate::models::EntityId;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Remove markup tags, decode entities and collapse whitespace to single
/// spaces.
pub fn strip_markup(text: &str) -> String {
    let without_tags = TAG.replace_all(text, " ");
    let decoded = quick_xml::escape::unescape(&without_tags)
        .unwrap_or(Cow::Borrowed(without_tags.as_ref()));
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// An entity reference token found in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef<'a> {
    Id(EntityId),
    /// Matches the token pattern but names no representable id.
    Unresolvable(&'a str),
}

/// Whitespace-split `query` into (free-text terms, entity references).
pub fn split_query(query: &str) -> (Vec<&str>, Vec<EntityRef<'_>>) {
    let mut terms = Vec::new();
    let mut refs = Vec::new();
    for token in query.split_whitespace() {
        match EntityId::parse_token(token) {
            Some(id) => refs.push(EntityRef::Id(id)),
            None if EntityId::is_token(token) => refs.push(EntityRef::Unresolvable(token)),
            None => terms.push(token),
        }
    }
    (terms, refs)
}

/// Drop every entity reference token and rejoin the rest with single spaces.
pub fn filter(query: &str) -> String {
    let (terms, _) = split_query(query);
    terms.join(" ")
}

pub struct QueryExpander {
    entities: Arc<EntityCorpus>,
}

impl QueryExpander {
    pub fn new(entities: Arc<EntityCorpus>) -> Self {
        Self { entities }
    }

    pub fn filter(&self, query: &str) -> String {
        filter(query)
    }

    /// Filtered query followed by the flattened description of every
    /// referenced entity, in query order.
    pub fn expand(&self, query: &str) -> Result<String, ExpansionError> {
        let (terms, refs) = split_query(query);
        let mut expanded = terms.join(" ");
        for entity in refs {
            let id = match entity {
                EntityRef::Id(id) => id,
                EntityRef::Unresolvable(token) => {
                    return Err(ExpansionError::UnknownEntity(token.to_string()))
                }
            };
            let content = self.entities.read(id)?;
            let flat = strip_markup(&content);
            if flat.is_empty() {
                continue;
            }
            if !expanded.is_empty() {
                expanded.push(' ');
            }
            expanded.push_str(&flat);
        }
        Ok(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_drops_reference_tokens() {
        assert_eq!(filter("c0001 inflation"), "inflation");
        assert_eq!(filter("  taux   c12 c3  BCE "), "taux BCE");
        assert_eq!(filter("c12"), "");
        assert_eq!(filter("c12x cx"), "c12x cx");
    }

    #[test]
    fn split_keeps_order() {
        let (terms, refs) = split_query("c2 euro c10 dollar");
        assert_eq!(terms, vec!["euro", "dollar"]);
        assert_eq!(refs, vec![EntityRef::Id(EntityId(2)), EntityRef::Id(EntityId(10))]);
    }

    #[test]
    fn strip_markup_flattens() {
        assert_eq!(
            strip_markup("<p>Banque&nbsp;<b>centrale</b></p>\n européenne"),
            "Banque&nbsp; centrale européenne"
        );
        assert_eq!(strip_markup("A &amp; B"), "A & B");
    }

    #[test]
    fn expand_appends_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("1")).unwrap();
        std::fs::write(dir.path().join("1/BCE.txt"), "central bank policy\n").unwrap();
        let expander = QueryExpander::new(Arc::new(EntityCorpus::new(dir.path(), 50)));

        let expanded = expander.expand("c0001 inflation").unwrap();
        assert!(expanded.contains("inflation"));
        assert!(expanded.contains("central bank policy"));
        assert!(!expanded.contains("c0001"));
        assert_eq!(expander.filter("c0001 inflation"), "inflation");
    }

    #[test]
    fn overflowing_reference_fails_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let expander = QueryExpander::new(Arc::new(EntityCorpus::new(dir.path(), 50)));
        let token = "c99999999999999999999999";

        let query = format!("{} inflation", token);
        let (terms, refs) = split_query(&query);
        assert_eq!(terms, vec!["inflation"]);
        assert_eq!(refs, vec![EntityRef::Unresolvable(token)]);

        match expander.expand(&format!("{} inflation", token)) {
            Err(ExpansionError::UnknownEntity(t)) => assert_eq!(t, token),
            other => panic!("expected unknown entity, got {:?}", other),
        }
        assert_eq!(expander.filter(&format!("{} inflation", token)), "inflation");
    }

    #[test]
    fn expand_fails_on_unknown_entity() {
        let dir = tempfile::tempdir().unwrap();
        let expander = QueryExpander::new(Arc::new(EntityCorpus::new(dir.path(), 50)));
        match expander.expand("c9 inflation") {
            Err(ExpansionError::UnknownEntity(id)) => assert_eq!(id, "c9"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn expand_without_references_is_filter() {
        let dir = tempfile::tempdir().unwrap();
        let expander = QueryExpander::new(Arc::new(EntityCorpus::new(dir.path(), 50)));
        assert_eq!(expander.expand(" taux  directeurs ").unwrap(), "taux directeurs");
    }
}
