//! Vector store abstraction.
//!
//! Two independent stores exist at runtime, one per [`Corpus`](crate::models::Corpus).
//! A store is opened either [`OpenMode::ReadOnly`] for serving (any number
//! of concurrent searches) or [`OpenMode::ExclusiveWrite`] for reindexing.
//! Write calls against a read-only store fail before touching storage.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteVectorStore`] | One SQLite file per index |
//! | [`InMemoryVectorStore`] | Tests and throwaway indexes |

mod memory;
mod sqlite;

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::embedding::cosine_similarity;
use crate::models::{RecordMarker, VectorRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ExclusiveWrite,
}

impl OpenMode {
    /// Guard for every mutating call.
    pub fn ensure_writable(&self) -> Result<()> {
        if *self == OpenMode::ReadOnly {
            bail!("Vector store is open read-only; reopen in exclusive-write mode to modify it");
        }
        Ok(())
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record_id: String,
    pub source_path: PathBuf,
    pub span_index: usize,
    pub text: String,
    pub marker: RecordMarker,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn mode(&self) -> OpenMode;

    /// Add records; a record whose id is already stored is replaced in place.
    async fn insert(&self, records: &[VectorRecord]) -> Result<usize>;

    /// Atomically swap the whole store contents for `records`.
    async fn replace_all(&self, records: &[VectorRecord]) -> Result<usize>;

    /// Top `k` records by cosine similarity, best first. Equal scores keep
    /// insertion order.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    async fn len(&self) -> Result<usize>;
}

/// Score `rows` (in insertion order) against `query` and keep the best `k`.
pub(crate) fn rank<I>(query: &[f32], rows: I, k: usize) -> Vec<SearchHit>
where
    I: IntoIterator<Item = (SearchHit, Vec<f32>)>,
{
    let mut scored: Vec<SearchHit> = rows
        .into_iter()
        .map(|(mut hit, vector)| {
            hit.score = cosine_similarity(query, &vector);
            hit
        })
        .collect();
    // Stable sort: ties stay in insertion order.
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str) -> SearchHit {
        SearchHit {
            record_id: id.to_string(),
            source_path: PathBuf::from(format!("/c/{}.txt", id)),
            span_index: 0,
            text: id.to_string(),
            marker: RecordMarker::Entity,
            score: 0.0,
        }
    }

    #[test]
    fn rank_orders_by_score_then_insertion() {
        let rows = vec![
            (hit("a"), vec![0.0, 1.0]),
            (hit("b"), vec![1.0, 0.0]),
            (hit("c"), vec![2.0, 0.0]),
            (hit("d"), vec![1.0, 1.0]),
        ];
        let ranked = rank(&[1.0, 0.0], rows, 3);
        let ids: Vec<_> = ranked.iter().map(|h| h.record_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
    }

    #[test]
    fn read_only_guard() {
        assert!(OpenMode::ReadOnly.ensure_writable().is_err());
        assert!(OpenMode::ExclusiveWrite.ensure_writable().is_ok());
    }
}
