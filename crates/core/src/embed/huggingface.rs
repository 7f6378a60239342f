use crate::config::Settings;
use crate::embed::Embedder;
use crate::llm::huggingface::{InferenceHttp, InferenceOptions};
use crate::llm::Provider;
use anyhow::{bail, ensure, Context};
use serde::Serialize;
use serde_json::Value;

const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
const DEFAULT_BATCH_SIZE: usize = 32;

/// Sentence embeddings from the hosted feature-extraction pipeline.
#[derive(Debug, Clone)]
pub struct HuggingFaceEmbedder {
    inference: InferenceHttp,
    model: String,
    batch_size: usize,
}

impl HuggingFaceEmbedder {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let inference = InferenceHttp::from_settings(settings)?;
        let model =
            std::env::var("HF_EMBEDDING_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let batch_size = std::env::var("HF_EMBEDDING_BATCH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n >= 1)
            .unwrap_or(DEFAULT_BATCH_SIZE);

        Ok(Self {
            inference,
            model,
            batch_size,
        })
    }

    pub fn new(inference: InferenceHttp, model: impl Into<String>) -> Self {
        Self {
            inference,
            model: model.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Serialize)]
struct FeatureExtractionRequest<'a> {
    inputs: &'a [String],
    options: InferenceOptions,
}

#[async_trait::async_trait]
impl Embedder for HuggingFaceEmbedder {
    fn provider(&self) -> Provider {
        Provider::HuggingFace
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let path = format!("pipeline/feature-extraction/{}", self.model);
        let mut out = Vec::with_capacity(texts.len());

        for (batch_idx, chunk) in texts.chunks(self.batch_size).enumerate() {
            let req = FeatureExtractionRequest {
                inputs: chunk,
                options: InferenceOptions {
                    wait_for_model: true,
                },
            };
            let raw = self.inference.post_json(&path, &req, "embed_http").await?;
            let vectors = parse_embeddings(raw, chunk.len())
                .with_context(|| format!("unexpected feature-extraction output from {}", self.model))?;

            tracing::debug!(
                model = %self.model,
                batch_idx,
                batch_size = chunk.len(),
                dimension = vectors.first().map(Vec::len).unwrap_or(0),
                "embedded batch"
            );
            out.extend(vectors);
        }

        Ok(out)
    }
}

/// Accepts one sentence vector per input (`[[f32]]`) or token vectors per
/// input (`[[[f32]]]`), which are mean-pooled.
fn parse_embeddings(raw: Value, expected: usize) -> anyhow::Result<Vec<Vec<f32>>> {
    let Value::Array(items) = raw else {
        bail!("expected a JSON array of embeddings");
    };
    ensure!(
        items.len() == expected,
        "expected {expected} embeddings, got {}",
        items.len()
    );

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Value::Array(inner) = item else {
            bail!("embedding is not an array");
        };
        let vector = match inner.first() {
            Some(Value::Array(_)) => mean_pool(&inner)?,
            _ => to_vector(&inner)?,
        };
        ensure!(!vector.is_empty(), "embedding is empty");
        out.push(vector);
    }
    Ok(out)
}

fn to_vector(values: &[Value]) -> anyhow::Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|x| x as f32)
                .context("embedding component is not a number")
        })
        .collect()
}

fn mean_pool(tokens: &[Value]) -> anyhow::Result<Vec<f32>> {
    let mut sum: Vec<f32> = Vec::new();
    for token in tokens {
        let Value::Array(values) = token else {
            bail!("token embedding is not an array");
        };
        let v = to_vector(values)?;
        if sum.is_empty() {
            sum = v;
            continue;
        }
        ensure!(v.len() == sum.len(), "token embeddings differ in dimension");
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += x;
        }
    }
    let n = tokens.len().max(1) as f32;
    Ok(sum.into_iter().map(|x| x / n).collect())
}
