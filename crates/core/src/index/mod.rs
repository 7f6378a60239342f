use crate::domain::document::Document;
use crate::embed::Embedder;
use crate::storage::csv_store::{read_quotes_csv, CsvRow};
use crate::storage::vector_index::VectorIndex;
use anyhow::{ensure, Context};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// One document per CSV row: `column: value` lines, with the source path and
/// 0-based row index as metadata.
pub fn load_documents(path: &Path) -> anyhow::Result<Vec<Document>> {
    let rows = read_quotes_csv(path)?;
    let source = path.display().to_string();
    Ok(rows.iter().map(|row| row_document(row, &source)).collect())
}

fn row_document(row: &CsvRow, source: &str) -> Document {
    let text = row
        .fields
        .iter()
        .map(|(k, v)| format!("{}: {}", k.trim(), v.trim()))
        .collect::<Vec<_>>()
        .join("\n");

    let mut metadata = BTreeMap::new();
    metadata.insert("source".to_string(), json!(source));
    metadata.insert("row".to_string(), json!(row.index));

    Document { text, metadata }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub collection: String,
    pub added: usize,
    /// Documents in the collection after this run, including earlier copies.
    pub total: u64,
    pub ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct Indexer {
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
}

impl Indexer {
    pub fn new(index: VectorIndex, embedder: Arc<dyn Embedder>) -> Self {
        Self { index, embedder }
    }

    pub async fn index_csv(&self, path: &Path, collection: &str) -> anyhow::Result<IndexReport> {
        let documents = load_documents(path)
            .with_context(|| format!("failed to load documents from {}", path.display()))?;

        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed_documents(&texts)
                .await
                .with_context(|| format!("embedding with {} failed", self.embedder.model()))?
        };
        ensure!(
            embeddings.len() == documents.len(),
            "embedder returned {} vectors for {} documents",
            embeddings.len(),
            documents.len()
        );

        let ids = self
            .index
            .add_documents(collection, &documents, &embeddings)
            .await?;
        let total = self.index.count(collection).await?;

        if total > ids.len() as u64 {
            tracing::warn!(
                collection,
                added = ids.len(),
                total,
                "collection already held documents; new rows were appended alongside them"
            );
        }
        tracing::info!(
            collection,
            path = %path.display(),
            added = ids.len(),
            total,
            model = %self.embedder.model(),
            "csv indexed"
        );

        Ok(IndexReport {
            collection: collection.to_string(),
            added: ids.len(),
            total,
            ids,
        })
    }
}
