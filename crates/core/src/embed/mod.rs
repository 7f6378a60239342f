use crate::config::Settings;
use crate::llm::Provider;
use std::sync::Arc;

pub mod hashing;
pub mod huggingface;

#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    /// One vector per input, in input order.
    async fn embed_documents(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut out = self.embed_documents(&[text.to_string()]).await?;
        anyhow::ensure!(
            out.len() == 1,
            "embedder returned {} vectors for one query",
            out.len()
        );
        Ok(out.remove(0))
    }
}

/// Picks the embedder named by `EMBEDDING_PROVIDER` (default: huggingface).
pub fn from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn Embedder>> {
    let provider = settings
        .embedding_provider
        .as_deref()
        .unwrap_or("huggingface")
        .to_ascii_lowercase();

    match provider.as_str() {
        "huggingface" | "hf" => Ok(Arc::new(huggingface::HuggingFaceEmbedder::from_settings(
            settings,
        )?)),
        "hashing" | "local" => Ok(Arc::new(hashing::HashingEmbedder::from_env()?)),
        other => anyhow::bail!("unknown EMBEDDING_PROVIDER {other:?} (expected huggingface or hashing)"),
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
