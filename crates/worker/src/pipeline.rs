use anyhow::Context;
use quoterag_core::domain::normalize::normalize;
use quoterag_core::domain::quote::QuoteRecord;
use quoterag_core::embed::Embedder;
use quoterag_core::index::{IndexReport, Indexer};
use quoterag_core::ingest::provider::QuoteProvider;
use quoterag_core::llm::LlmClient;
use quoterag_core::rag::{Answer, QueryResponder};
use quoterag_core::storage::csv_store::write_quotes_csv;
use quoterag_core::storage::vector_index::VectorIndex;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_SYMBOL: &str = "AAPL";
pub const DEFAULT_QUESTION: &str = "What is the current stock price of Apple (AAPL)?";

#[derive(Debug)]
pub struct FetchOutcome {
    pub records: usize,
    pub written: bool,
}

/// Fetches, normalizes and writes quotes to `csv_path`. An empty result leaves
/// any existing CSV untouched.
pub async fn fetch_stage(
    provider: &dyn QuoteProvider,
    symbol: &str,
    exchange: Option<&str>,
    csv_path: &Path,
) -> anyhow::Result<FetchOutcome> {
    let raw = provider
        .fetch_quote(symbol, exchange)
        .await
        .with_context(|| format!("{} fetch for {symbol} failed", provider.provider_name()))?;

    if raw.is_empty() {
        tracing::warn!(symbol, exchange = exchange.unwrap_or(""), "no quote data returned");
        return Ok(FetchOutcome {
            records: 0,
            written: false,
        });
    }

    let normalized = raw
        .iter()
        .map(normalize)
        .collect::<Result<Vec<QuoteRecord>, _>>()
        .with_context(|| format!("normalizing {symbol} quote failed"))?;

    write_quotes_csv(csv_path, &normalized)?;
    Ok(FetchOutcome {
        records: normalized.len(),
        written: true,
    })
}

pub async fn index_stage(
    index: &VectorIndex,
    embedder: Arc<dyn Embedder>,
    csv_path: &Path,
    collection: &str,
) -> anyhow::Result<IndexReport> {
    Indexer::new(index.clone(), embedder)
        .index_csv(csv_path, collection)
        .await
}

pub async fn ask_stage(responder: &QueryResponder, question: &str) -> anyhow::Result<Answer> {
    responder.answer(question).await
}

pub fn build_responder(
    settings: &quoterag_core::config::Settings,
    index: &VectorIndex,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LlmClient>,
    collection: &str,
) -> anyhow::Result<QueryResponder> {
    Ok(QueryResponder::from_settings(settings, index.clone(), embedder, llm)?
        .with_collection(collection))
}
