use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use quoterag_core::config::Settings;
use quoterag_core::ingest::fmp::FmpClient;
use quoterag_core::llm::huggingface::HuggingFaceClient;
use quoterag_core::storage::vector_index::VectorIndex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod pipeline;

#[derive(Debug, Parser)]
#[command(name = "quoterag_worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch one quote, normalize it and write the CSV.
    Fetch {
        #[command(flatten)]
        quote: QuoteArgs,
        #[command(flatten)]
        paths: PathArgs,
    },
    /// Embed the CSV rows and append them to the collection.
    Index {
        #[command(flatten)]
        paths: PathArgs,
    },
    /// Answer a question from the indexed quotes.
    Ask {
        #[arg(long, default_value = pipeline::DEFAULT_QUESTION)]
        question: String,
        #[command(flatten)]
        paths: PathArgs,
    },
    /// Fetch, index, then ask.
    Run {
        #[command(flatten)]
        quote: QuoteArgs,
        #[arg(long, default_value = pipeline::DEFAULT_QUESTION)]
        question: String,
        #[command(flatten)]
        paths: PathArgs,
    },
    /// Print document counts per collection.
    Stats {
        #[command(flatten)]
        paths: PathArgs,
    },
}

#[derive(Debug, Args)]
struct QuoteArgs {
    #[arg(long, default_value = pipeline::DEFAULT_SYMBOL)]
    symbol: String,

    /// `NSE` switches to the search endpoint. Search hits carry no
    /// `earningsAnnouncement` or `timestamp`, so `fetch` and `run` reject them
    /// at normalization; use `GET /quotes/:symbol?exchange=NSE` to browse them.
    #[arg(long)]
    exchange: Option<String>,
}

#[derive(Debug, Args)]
struct PathArgs {
    /// Defaults to QUOTES_CSV_PATH.
    #[arg(long)]
    csv_path: Option<PathBuf>,

    /// Defaults to VECTOR_INDEX_DIR.
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Defaults to VECTOR_COLLECTION.
    #[arg(long)]
    collection: Option<String>,
}

struct Paths {
    csv_path: PathBuf,
    index_dir: PathBuf,
    collection: String,
}

impl PathArgs {
    fn resolve(self, settings: &Settings) -> Paths {
        Paths {
            csv_path: self
                .csv_path
                .unwrap_or_else(|| PathBuf::from(&settings.csv_path)),
            index_dir: self
                .index_dir
                .unwrap_or_else(|| PathBuf::from(&settings.index_dir)),
            collection: self
                .collection
                .unwrap_or_else(|| settings.collection.clone()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli.command, &settings).await {
        sentry_anyhow::capture_anyhow(&err);
        if let Some(diag) = err.downcast_ref::<quoterag_core::llm::error::LlmDiagnosticsError>() {
            tracing::error!(
                provider = ?diag.provider,
                stage = diag.stage,
                raw_output = diag.raw_output.as_deref().unwrap_or(""),
                "llm call failed"
            );
        }
        tracing::error!(error = %format!("{err:#}"), "worker run failed");
        return Err(err);
    }
    Ok(())
}

async fn run(command: Command, settings: &Settings) -> anyhow::Result<()> {
    match command {
        Command::Fetch { quote, paths } => {
            let paths = paths.resolve(settings);
            fetch(settings, &quote, &paths).await?;
        }
        Command::Index { paths } => {
            let paths = paths.resolve(settings);
            index(settings, &paths).await?;
        }
        Command::Ask { question, paths } => {
            let paths = paths.resolve(settings);
            ask(settings, &question, &paths).await?;
        }
        Command::Run {
            quote,
            question,
            paths,
        } => {
            let paths = paths.resolve(settings);
            let outcome = fetch(settings, &quote, &paths).await?;
            anyhow::ensure!(
                outcome.written || paths.csv_path.exists(),
                "no quote data for {} and no existing CSV at {}",
                quote.symbol,
                paths.csv_path.display()
            );
            index(settings, &paths).await?;
            ask(settings, &question, &paths).await?;
        }
        Command::Stats { paths } => {
            let paths = paths.resolve(settings);
            let vector_index = VectorIndex::open(&paths.index_dir).await?;
            for info in vector_index.collections().await? {
                println!(
                    "{}\t{} documents\tdim={}\tcreated={}",
                    info.name,
                    info.documents,
                    info.dimension,
                    info.created_at.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}

async fn fetch(
    settings: &Settings,
    quote: &QuoteArgs,
    paths: &Paths,
) -> anyhow::Result<pipeline::FetchOutcome> {
    let client = FmpClient::from_settings(settings)?;
    let outcome = pipeline::fetch_stage(
        &client,
        &quote.symbol,
        quote.exchange.as_deref(),
        &paths.csv_path,
    )
    .await?;
    tracing::info!(
        symbol = %quote.symbol,
        records = outcome.records,
        written = outcome.written,
        csv = %paths.csv_path.display(),
        "fetch stage done"
    );
    Ok(outcome)
}

async fn index(settings: &Settings, paths: &Paths) -> anyhow::Result<()> {
    let vector_index = VectorIndex::open(&paths.index_dir).await?;
    let embedder = quoterag_core::embed::from_settings(settings)?;
    let report = pipeline::index_stage(
        &vector_index,
        embedder,
        &paths.csv_path,
        &paths.collection,
    )
    .await?;
    tracing::info!(
        collection = %report.collection,
        added = report.added,
        total = report.total,
        "index stage done"
    );
    Ok(())
}

async fn ask(settings: &Settings, question: &str, paths: &Paths) -> anyhow::Result<()> {
    let vector_index = VectorIndex::open(&paths.index_dir).await?;
    let embedder = quoterag_core::embed::from_settings(settings)?;
    let llm = Arc::new(HuggingFaceClient::from_settings(settings)?);
    let responder =
        pipeline::build_responder(settings, &vector_index, embedder, llm, &paths.collection)?;

    let answer = pipeline::ask_stage(&responder, question)
        .await
        .context("ask stage failed")?;
    for source in &answer.sources {
        tracing::debug!(id = %source.document.id, score = source.score, "retrieved source");
    }
    println!("{}", answer.text.trim());
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
