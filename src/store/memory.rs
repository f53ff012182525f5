//! In-process vector store.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::RwLock;

use super::{rank, OpenMode, SearchHit, VectorStore};
use crate::models::VectorRecord;

/// `RwLock<Vec<_>>`-backed store with the same semantics as the SQLite
/// backend.
pub struct InMemoryVectorStore {
    mode: OpenMode,
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new(mode: OpenMode) -> Self {
        Self {
            mode,
            records: RwLock::new(Vec::new()),
        }
    }

    /// A read-only store preloaded with `records`.
    pub fn read_only(records: Vec<VectorRecord>) -> Self {
        Self {
            mode: OpenMode::ReadOnly,
            records: RwLock::new(records),
        }
    }

    fn upsert(records: &mut Vec<VectorRecord>, incoming: &[VectorRecord]) {
        for record in incoming {
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => records.push(record.clone()),
            }
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn mode(&self) -> OpenMode {
        self.mode
    }

    async fn insert(&self, records: &[VectorRecord]) -> Result<usize> {
        self.mode.ensure_writable()?;
        let mut guard = self
            .records
            .write()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        Self::upsert(&mut guard, records);
        Ok(records.len())
    }

    async fn replace_all(&self, records: &[VectorRecord]) -> Result<usize> {
        self.mode.ensure_writable()?;
        let mut fresh = Vec::with_capacity(records.len());
        Self::upsert(&mut fresh, records);
        let mut guard = self
            .records
            .write()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        *guard = fresh;
        Ok(records.len())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let guard = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        let rows = guard.iter().map(|r| {
            (
                SearchHit {
                    record_id: r.id.clone(),
                    source_path: r.source_path.clone(),
                    span_index: r.span_index,
                    text: r.text.clone(),
                    marker: r.marker,
                    score: 0.0,
                },
                r.vector.clone(),
            )
        });
        Ok(rank(vector, rows, k))
    }

    async fn len(&self) -> Result<usize> {
        let guard = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        Ok(guard.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordMarker;
    use std::path::PathBuf;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            source_path: PathBuf::from(format!("/docs/{}.xml", id)),
            span_index: 0,
            text: format!("text {}", id),
            marker: RecordMarker::Document,
            vector,
        }
    }

    #[tokio::test]
    async fn insert_and_search() {
        let store = InMemoryVectorStore::new(OpenMode::ExclusiveWrite);
        store
            .insert(&[record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0])])
            .await
            .unwrap();
        let hits = store.search(&[0.9, 0.1], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "a");
        assert_eq!(hits[0].source_path, PathBuf::from("/docs/a.xml"));
    }

    #[tokio::test]
    async fn insert_replaces_same_id() {
        let store = InMemoryVectorStore::new(OpenMode::ExclusiveWrite);
        store.insert(&[record("a", vec![1.0, 0.0])]).await.unwrap();
        store.insert(&[record("a", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replace_all_drops_previous_contents() {
        let store = InMemoryVectorStore::new(OpenMode::ExclusiveWrite);
        store.insert(&[record("old", vec![1.0, 0.0])]).await.unwrap();
        store.replace_all(&[record("new", vec![1.0, 0.0])]).await.unwrap();
        let hits = store.search(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "new");
    }

    #[tokio::test]
    async fn read_only_rejects_writes() {
        let store = InMemoryVectorStore::read_only(vec![record("a", vec![1.0])]);
        assert!(store.insert(&[record("b", vec![1.0])]).await.is_err());
        assert!(store.replace_all(&[]).await.is_err());
        assert_eq!(store.len().await.unwrap(), 1);
    }
}
