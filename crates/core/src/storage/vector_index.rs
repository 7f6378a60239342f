use crate::domain::document::{CollectionInfo, Document, ScoredDocument, StoredDocument};
use crate::embed::cosine_similarity;
use anyhow::{ensure, Context};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::fmt::Hyphenated;
use uuid::Uuid;

const INDEX_FILE: &str = "index.sqlite3";

/// Durable, append-only store of embedded documents grouped into named
/// collections. Search is an exhaustive cosine scan over one collection.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    pool: SqlitePool,
    path: PathBuf,
}

impl VectorIndex {
    pub async fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create index directory {}", dir.display()))?;
        let path = dir.join(INDEX_FILE);

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open vector index {}", path.display()))?;

        crate::storage::migrate(&pool).await?;
        tracing::debug!(path = %path.display(), "vector index opened");

        Ok(Self { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Appends documents to `collection`, creating it on first use. Identical
    /// documents are stored again under fresh ids.
    pub async fn add_documents(
        &self,
        collection: &str,
        documents: &[Document],
        embeddings: &[Vec<f32>],
    ) -> anyhow::Result<Vec<Uuid>> {
        ensure!(!collection.trim().is_empty(), "collection name must be non-empty");
        ensure!(
            documents.len() == embeddings.len(),
            "got {} documents but {} embeddings",
            documents.len(),
            embeddings.len()
        );
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let dimension = embeddings[0].len();
        ensure!(dimension > 0, "embeddings must be non-empty");
        ensure!(
            embeddings.iter().all(|e| e.len() == dimension),
            "embeddings in one batch must share a dimension"
        );

        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        sqlx::query(
            "INSERT INTO collections (name, dimension, created_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(collection)
        .bind(dimension as i64)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("insert collections failed")?;

        let (stored_dimension,): (i64,) =
            sqlx::query_as("SELECT dimension FROM collections WHERE name = ?1")
                .bind(collection)
                .fetch_one(&mut *tx)
                .await
                .context("select collection dimension failed")?;
        ensure!(
            stored_dimension as usize == dimension,
            "collection {collection:?} holds {stored_dimension}-dimensional vectors, got {dimension}"
        );

        let mut ids = Vec::with_capacity(documents.len());
        for (doc, embedding) in documents.iter().zip(embeddings) {
            let id = Uuid::new_v4();
            let metadata =
                serde_json::to_string(&doc.metadata).context("serialize metadata failed")?;
            sqlx::query(
                "INSERT INTO documents (id, collection, text, metadata, embedding, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(id.hyphenated())
            .bind(collection)
            .bind(&doc.text)
            .bind(metadata)
            .bind(encode_embedding(embedding))
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("insert documents failed")?;
            ids.push(id);
        }

        tx.commit().await.context("commit transaction failed")?;
        tracing::info!(collection, added = ids.len(), dimension, "documents indexed");
        Ok(ids)
    }

    pub async fn count(&self, collection: &str) -> anyhow::Result<u64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents WHERE collection = ?1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .context("count documents failed")?;
        Ok(n.max(0) as u64)
    }

    pub async fn collection(&self, name: &str) -> anyhow::Result<Option<CollectionInfo>> {
        Ok(self
            .collections()
            .await?
            .into_iter()
            .find(|c| c.name == name))
    }

    pub async fn collections(&self) -> anyhow::Result<Vec<CollectionInfo>> {
        let rows = sqlx::query_as::<_, (String, i64, DateTime<Utc>, i64)>(
            "SELECT c.name, c.dimension, c.created_at, \
                    (SELECT COUNT(*) FROM documents d WHERE d.collection = c.name) \
             FROM collections c \
             ORDER BY c.name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("select collections failed")?;

        Ok(rows
            .into_iter()
            .map(|(name, dimension, created_at, documents)| CollectionInfo {
                name,
                dimension: dimension.max(0) as usize,
                documents: documents.max(0) as u64,
                created_at,
            })
            .collect())
    }

    /// Top-`k` documents by cosine similarity, best first. Equal scores keep
    /// insertion order. A missing collection yields no results.
    pub async fn similarity_search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> anyhow::Result<Vec<ScoredDocument>> {
        let Some(info) = self.collection(collection).await? else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        ensure!(
            query.len() == info.dimension,
            "query has {} dimensions but collection {collection:?} has {}",
            query.len(),
            info.dimension
        );

        let rows = sqlx::query_as::<_, (Hyphenated, String, String, Vec<u8>, DateTime<Utc>)>(
            "SELECT id, text, metadata, embedding, created_at \
             FROM documents \
             WHERE collection = ?1 \
             ORDER BY seq ASC",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .context("select documents failed")?;

        let mut scored = Vec::with_capacity(rows.len());
        for (id, text, metadata, embedding, created_at) in rows {
            let embedding = decode_embedding(&embedding)?;
            let score = cosine_similarity(query, &embedding);
            let metadata: BTreeMap<String, serde_json::Value> = serde_json::from_str(&metadata)
                .with_context(|| format!("invalid metadata for document {id}"))?;
            let id = id.into_uuid();
            scored.push(ScoredDocument {
                document: StoredDocument {
                    id,
                    text,
                    metadata,
                    created_at,
                },
                score,
            });
        }

        // Stable sort keeps insertion order among ties.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        tracing::debug!(
            collection,
            k,
            hits = scored.len(),
            best = scored.first().map(|s| s.score).unwrap_or(0.0),
            "similarity search"
        );
        Ok(scored)
    }
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> anyhow::Result<Vec<f32>> {
    ensure!(
        bytes.len() % 4 == 0,
        "stored embedding has {} bytes, not a multiple of 4",
        bytes.len()
    );
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(text: &str, row: usize) -> Document {
        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), json!("data/quote.csv"));
        metadata.insert("row".to_string(), json!(row));
        Document {
            text: text.to_string(),
            metadata,
        }
    }

    #[test]
    fn embedding_bytes_round_trip() {
        let v = vec![0.5f32, -1.25, 3.0e-7];
        assert_eq!(decode_embedding(&encode_embedding(&v)).unwrap(), v);
        assert!(decode_embedding(&[0, 1, 2]).is_err());
    }

    #[tokio::test]
    async fn appends_without_dedup_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).await.unwrap();

        let docs = vec![doc("symbol: AAPL", 0)];
        let emb = vec![vec![1.0, 0.0, 0.0]];
        let first = index.add_documents("quotes", &docs, &emb).await.unwrap();
        let second = index.add_documents("quotes", &docs, &emb).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(index.count("quotes").await.unwrap(), 2);
        assert_eq!(index.count("other").await.unwrap(), 0);

        let info = index.collection("quotes").await.unwrap().unwrap();
        assert_eq!(info.dimension, 3);
        assert_eq!(info.documents, 2);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = VectorIndex::open(dir.path()).await.unwrap();
            index
                .add_documents("quotes", &[doc("a", 0)], &[vec![1.0, 2.0]])
                .await
                .unwrap();
            index.close().await;
        }

        let index = VectorIndex::open(dir.path()).await.unwrap();
        assert_eq!(index.count("quotes").await.unwrap(), 1);
        assert!(index.path().ends_with(INDEX_FILE));
    }

    #[tokio::test]
    async fn rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).await.unwrap();
        index
            .add_documents("quotes", &[doc("a", 0)], &[vec![1.0, 2.0]])
            .await
            .unwrap();

        let err = index
            .add_documents("quotes", &[doc("b", 0)], &[vec![1.0, 2.0, 3.0]])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2-dimensional"));
        assert_eq!(index.count("quotes").await.unwrap(), 1);

        assert!(index
            .similarity_search("quotes", &[1.0], 2)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_caps_at_k() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).await.unwrap();
        let docs = vec![doc("east", 0), doc("north", 1), doc("north-east", 2)];
        let emb = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]];
        index.add_documents("compass", &docs, &emb).await.unwrap();

        let hits = index
            .similarity_search("compass", &[0.0, 1.0], 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.text, "north");
        assert_eq!(hits[1].document.text, "north-east");
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].document.metadata["row"], json!(1));
    }

    #[tokio::test]
    async fn single_document_indexed_twice_yields_one_distinct_text() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).await.unwrap();
        let docs = vec![doc("symbol: AAPL\nprice: 189.84", 0)];
        let emb = vec![vec![0.3, 0.4]];
        index.add_documents("quotes", &docs, &emb).await.unwrap();
        index.add_documents("quotes", &docs, &emb).await.unwrap();

        let hits = index.similarity_search("quotes", &[0.3, 0.4], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.text, hits[1].document.text);
        assert_ne!(hits[0].document.id, hits[1].document.id);
    }

    #[tokio::test]
    async fn ids_are_stored_as_hyphenated_text_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).await.unwrap();
        let ids = index
            .add_documents("quotes", &[doc("symbol: AAPL", 0)], &[vec![1.0, 0.0]])
            .await
            .unwrap();

        let (stored,): (String,) = sqlx::query_as("SELECT id FROM documents")
            .fetch_one(&index.pool)
            .await
            .unwrap();
        assert_eq!(stored, ids[0].hyphenated().to_string());

        let hits = index
            .similarity_search("quotes", &[1.0, 0.0], 1)
            .await
            .unwrap();
        assert_eq!(hits[0].document.id, ids[0]);
    }

    #[tokio::test]
    async fn missing_collection_searches_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).await.unwrap();
        let hits = index.similarity_search("nothing", &[1.0], 2).await.unwrap();
        assert!(hits.is_empty());
        assert!(index.collections().await.unwrap().is_empty());
    }
}
