//! SQLite-backed vector store: one database file per index.
//!
//! Vectors are little-endian f32 BLOBs; search loads every vector and ranks
//! by cosine similarity. Read-only opens use `mode=ro` connections and
//! require the index to exist. Exclusive-write opens hold SQLite's
//! exclusive lock on a single connection for the lifetime of the store,
//! so a concurrent reader or second writer fails to open instead of
//! observing a half-built index.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteLockingMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};

use super::{rank, OpenMode, SearchHit, VectorStore};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{RecordMarker, VectorRecord};

pub struct SqliteVectorStore {
    pool: SqlitePool,
    mode: OpenMode,
    path: PathBuf,
}

impl SqliteVectorStore {
    pub async fn open(path: &Path, mode: OpenMode) -> Result<Self> {
        let pool = match mode {
            OpenMode::ReadOnly => {
                if !path.exists() {
                    bail!(
                        "Index not found at {}. Run `nrag reindex` first.",
                        path.display()
                    );
                }
                let options = SqliteConnectOptions::new().filename(path).read_only(true);
                SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
            }
            OpenMode::ExclusiveWrite => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .locking_mode(SqliteLockingMode::Exclusive);
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect_with(options)
                    .await
            }
        }
        .with_context(|| format!("Failed to open index {}", path.display()))?;

        let store = Self {
            pool,
            mode,
            path: path.to_path_buf(),
        };
        if mode == OpenMode::ExclusiveWrite {
            store.migrate().await?;
        }
        Ok(store)
    }

    /// Close every pooled connection, releasing an exclusive lock.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                source_path TEXT NOT NULL,
                span_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                marker TEXT NOT NULL,
                dims INTEGER NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_into<'e, E>(executor: E, record: &VectorRecord) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO records (id, source_path, span_index, text, marker, dims, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_path = excluded.source_path,
                span_index = excluded.span_index,
                text = excluded.text,
                marker = excluded.marker,
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
        )
        .bind(&record.id)
        .bind(record.source_path.to_string_lossy().to_string())
        .bind(record.span_index as i64)
        .bind(&record.text)
        .bind(record.marker.as_str())
        .bind(record.vector.len() as i64)
        .bind(vec_to_blob(&record.vector))
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn mode(&self) -> OpenMode {
        self.mode
    }

    async fn insert(&self, records: &[VectorRecord]) -> Result<usize> {
        self.mode.ensure_writable()?;
        let mut tx = self.pool.begin().await?;
        for record in records {
            Self::insert_into(&mut *tx, record).await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    async fn replace_all(&self, records: &[VectorRecord]) -> Result<usize> {
        self.mode.ensure_writable()?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM records").execute(&mut *tx).await?;
        for record in records {
            Self::insert_into(&mut *tx, record).await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            "SELECT id, source_path, span_index, text, marker, embedding FROM records ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let marker: String = row.get("marker");
            let Some(marker) = RecordMarker::parse(&marker) else {
                continue;
            };
            let source_path: String = row.get("source_path");
            let span_index: i64 = row.get("span_index");
            let blob: Vec<u8> = row.get("embedding");
            scored.push((
                SearchHit {
                    record_id: row.get("id"),
                    source_path: PathBuf::from(source_path),
                    span_index: span_index.max(0) as usize,
                    text: row.get("text"),
                    marker,
                    score: 0.0,
                },
                blob_to_vec(&blob),
            ));
        }

        Ok(rank(vector, scored, k))
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, source: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            source_path: PathBuf::from(source),
            span_index: 0,
            text: format!("span {}", id),
            marker: RecordMarker::Document,
            vector,
        }
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx/news.sqlite");

        {
            let store = SqliteVectorStore::open(&path, OpenMode::ExclusiveWrite)
                .await
                .unwrap();
            store
                .replace_all(&[
                    record("a", "/n/a.xml", vec![1.0, 0.0]),
                    record("b", "/n/b.xml", vec![0.0, 1.0]),
                ])
                .await
                .unwrap();
            assert_eq!(store.len().await.unwrap(), 2);
            store.pool.close().await;
        }

        let store = SqliteVectorStore::open(&path, OpenMode::ReadOnly)
            .await
            .unwrap();
        let hits = store.search(&[0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record_id, "b");
        assert_eq!(hits[0].source_path, PathBuf::from("/n/b.xml"));
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn replace_all_swaps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wiki.sqlite");
        let store = SqliteVectorStore::open(&path, OpenMode::ExclusiveWrite)
            .await
            .unwrap();
        store
            .insert(&[record("old", "/w/old.txt", vec![1.0])])
            .await
            .unwrap();
        store
            .replace_all(&[record("new", "/w/new.txt", vec![1.0])])
            .await
            .unwrap();
        let hits = store.search(&[1.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "new");
    }

    #[tokio::test]
    async fn read_only_requires_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteVectorStore::open(&dir.path().join("missing.sqlite"), OpenMode::ReadOnly)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("reindex"));
    }

    #[tokio::test]
    async fn read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.sqlite");
        {
            let store = SqliteVectorStore::open(&path, OpenMode::ExclusiveWrite)
                .await
                .unwrap();
            store.pool.close().await;
        }
        let store = SqliteVectorStore::open(&path, OpenMode::ReadOnly)
            .await
            .unwrap();
        assert!(store
            .insert(&[record("x", "/n/x.xml", vec![1.0])])
            .await
            .is_err());
        assert_eq!(store.len().await.unwrap(), 0);
    }
}
