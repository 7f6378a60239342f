pub mod domain;
pub mod embed;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod rag;
pub mod storage;

pub mod config {
    use anyhow::Context;

    const DEFAULT_CSV_PATH: &str = "data/quote.csv";
    const DEFAULT_INDEX_DIR: &str = "data/vector_index";
    const DEFAULT_COLLECTION: &str = "stock_quotes";
    const DEFAULT_TOP_K: usize = 2;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub fmp_api_key: Option<String>,
        pub fmp_base_url: Option<String>,
        pub huggingface_api_token: Option<String>,
        pub huggingface_base_url: Option<String>,
        pub embedding_provider: Option<String>,
        pub sentry_dsn: Option<String>,
        pub prompt_template: Option<String>,
        pub csv_path: String,
        pub index_dir: String,
        pub collection: String,
        pub top_k: usize,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let top_k = match std::env::var("RAG_TOP_K") {
                Ok(s) => s
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("RAG_TOP_K must be a positive integer (got {s:?})"))?,
                Err(_) => DEFAULT_TOP_K,
            };
            anyhow::ensure!(top_k >= 1, "RAG_TOP_K must be >= 1");

            Ok(Self {
                fmp_api_key: non_empty_var("FMP_API_KEY"),
                fmp_base_url: non_empty_var("FMP_BASE_URL"),
                huggingface_api_token: non_empty_var("HUGGINGFACEHUB_API_TOKEN"),
                huggingface_base_url: non_empty_var("HF_BASE_URL"),
                embedding_provider: non_empty_var("EMBEDDING_PROVIDER"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                prompt_template: non_empty_var("PROMPT_TEMPLATE"),
                csv_path: non_empty_var("QUOTES_CSV_PATH")
                    .unwrap_or_else(|| DEFAULT_CSV_PATH.to_string()),
                index_dir: non_empty_var("VECTOR_INDEX_DIR")
                    .unwrap_or_else(|| DEFAULT_INDEX_DIR.to_string()),
                collection: non_empty_var("VECTOR_COLLECTION")
                    .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
                top_k,
            })
        }

        pub fn require_fmp_api_key(&self) -> anyhow::Result<&str> {
            self.fmp_api_key
                .as_deref()
                .context("FMP_API_KEY is required")
        }

        pub fn require_huggingface_api_token(&self) -> anyhow::Result<&str> {
            self.huggingface_api_token
                .as_deref()
                .context("HUGGINGFACEHUB_API_TOKEN is required")
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
