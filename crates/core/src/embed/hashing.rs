use crate::embed::Embedder;
use crate::llm::Provider;

const DEFAULT_DIMENSION: usize = 256;
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Offline embedder: signed feature hashing over lowercase word tokens,
/// L2-normalized. Deterministic across runs and platforms.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model: String,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model: format!("fnv1a-hashing-{}", dimension.max(1)),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let dimension = match std::env::var("HASHING_EMBEDDING_DIM") {
            Ok(s) => s.trim().parse::<usize>()?,
            Err(_) => DEFAULT_DIMENSION,
        };
        anyhow::ensure!(dimension >= 8, "HASHING_EMBEDDING_DIM must be >= 8");
        Ok(Self::new(dimension))
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait::async_trait]
impl Embedder for HashingEmbedder {
    fn provider(&self) -> Provider {
        Provider::Hashing
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = FNV_OFFSET;
    for b in bytes {
        h ^= u64::from(*b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::cosine_similarity;

    #[test]
    fn vectors_are_unit_length_and_deterministic() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_text("symbol: AAPL\nprice: 189.84");
        let b = e.embed_text("symbol: AAPL\nprice: 189.84");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_tokens_score_higher() {
        let e = HashingEmbedder::default();
        let doc = e.embed_text("symbol: AAPL\nname: Apple Inc.\nprice: 189.84");
        let close = e.embed_text("What is the price of Apple (AAPL)?");
        let far = e.embed_text("weather forecast tomorrow");
        assert!(cosine_similarity(&doc, &close) > cosine_similarity(&doc, &far));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let e = HashingEmbedder::new(16);
        assert!(e.embed_text("  ").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn embed_query_matches_embed_documents() {
        let e = HashingEmbedder::new(32);
        let q = e.embed_query("AAPL price").await.unwrap();
        let d = e.embed_documents(&["AAPL price".to_string()]).await.unwrap();
        assert_eq!(vec![q], d);
    }
}
