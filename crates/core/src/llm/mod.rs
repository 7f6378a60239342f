pub mod error;
pub mod huggingface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    HuggingFace,
    Hashing,
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}
