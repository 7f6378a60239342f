use crate::config::Settings;
use crate::domain::quote::QuoteRecord;
use crate::ingest::error::FetchError;
use crate::ingest::provider::{parse_quote_body, QuoteProvider};
use anyhow::{ensure, Context, Result};
use reqwest::Url;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://financialmodelingprep.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
// A single attempt unless FMP_RETRIES asks for more.
const DEFAULT_RETRIES: u32 = 1;

/// Exchange hint that switches the lookup to the symbol search endpoint.
const SEARCH_EXCHANGE: &str = "NSE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteEndpoint {
    Quote,
    Search,
}

impl QuoteEndpoint {
    pub fn for_exchange(exchange: Option<&str>) -> Self {
        match exchange {
            Some(e) if e.trim().eq_ignore_ascii_case(SEARCH_EXCHANGE) => Self::Search,
            _ => Self::Quote,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FmpClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    retries: u32,
}

impl FmpClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_fmp_api_key()?.to_string();
        let base_url = settings
            .fmp_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("FMP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("FMP_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        Self::new(base_url, api_key, Duration::from_secs(timeout_secs), retries)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build quote provider http client")?;

        let base_url: String = base_url.into();
        let base_url = Url::parse(&base_url)
            .with_context(|| format!("invalid quote provider base URL {base_url:?}"))?;
        ensure!(
            !base_url.cannot_be_a_base(),
            "quote provider base URL {base_url} cannot carry a path"
        );

        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
            retries: retries.max(1),
        })
    }

    /// URL and query parameters for one lookup. The API key travels as `apikey`.
    /// The symbol is escaped as a single path segment, so it cannot leave
    /// `/api/v3/quote/`.
    pub fn request_parts(
        &self,
        symbol: &str,
        exchange: Option<&str>,
    ) -> Result<(Url, Vec<(&'static str, String)>), FetchError> {
        let symbol = symbol.trim();
        if symbol.is_empty() || symbol == "." || symbol == ".." {
            return Err(FetchError::InvalidSymbol {
                symbol: symbol.to_string(),
            });
        }

        let endpoint = QuoteEndpoint::for_exchange(exchange);
        let mut url = self.base_url.clone();
        {
            let Ok(mut segments) = url.path_segments_mut() else {
                return Err(FetchError::InvalidSymbol {
                    symbol: symbol.to_string(),
                });
            };
            segments.pop_if_empty().extend(["api", "v3"]);
            match endpoint {
                QuoteEndpoint::Search => segments.push("search"),
                QuoteEndpoint::Quote => segments.push("quote").push(symbol),
            };
        }

        let params = match endpoint {
            QuoteEndpoint::Search => vec![
                ("query", symbol.to_string()),
                ("exchange", SEARCH_EXCHANGE.to_string()),
                ("apikey", self.api_key.clone()),
            ],
            QuoteEndpoint::Quote => vec![("apikey", self.api_key.clone())],
        };
        Ok((url, params))
    }

    async fn fetch_once(
        &self,
        symbol: &str,
        exchange: Option<&str>,
    ) -> Result<Vec<QuoteRecord>, FetchError> {
        let (url, params) = self.request_parts(symbol, exchange)?;

        let res = self
            .http
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = res.status();
        let bytes = res.bytes().await.map_err(FetchError::Transport)?;
        let body = std::str::from_utf8(&bytes).map_err(|err| FetchError::Decode {
            detail: format!("response is not UTF-8: {err}"),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })?;

        parse_quote_body(status, body)
    }
}

#[async_trait::async_trait]
impl QuoteProvider for FmpClient {
    fn provider_name(&self) -> &'static str {
        "financialmodelingprep"
    }

    async fn fetch_quote(
        &self,
        symbol: &str,
        exchange: Option<&str>,
    ) -> Result<Vec<QuoteRecord>, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(symbol, exchange).await {
                Ok(records) => {
                    tracing::info!(
                        symbol,
                        exchange = exchange.unwrap_or(""),
                        records = records.len(),
                        "quote fetched"
                    );
                    return Ok(records);
                }
                Err(err) => {
                    if attempt >= self.retries || !err.is_retryable() {
                        tracing::error!(
                            symbol,
                            attempt,
                            category = err.category(),
                            error = %err,
                            "quote fetch failed"
                        );
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1).min(5));
                    tracing::warn!(
                        symbol,
                        attempt,
                        ?backoff,
                        category = err.category(),
                        error = %err,
                        "quote fetch failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
