use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use quoterag_core::config::Settings;
use quoterag_core::domain::document::CollectionInfo;
use quoterag_core::domain::normalize::{normalize, NormalizeError};
use quoterag_core::domain::quote::QuoteRecord;
use quoterag_core::ingest::error::FetchError;
use quoterag_core::ingest::fmp::FmpClient;
use quoterag_core::ingest::provider::QuoteProvider;
use quoterag_core::llm::huggingface::HuggingFaceClient;
use quoterag_core::rag::{Answer, QueryResponder};
use quoterag_core::storage::vector_index::VectorIndex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

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

    let quotes: Option<Arc<dyn QuoteProvider>> = match FmpClient::from_settings(&settings) {
        Ok(client) => Some(Arc::new(client) as Arc<dyn QuoteProvider>),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "quote client unavailable; /quotes disabled");
            None
        }
    };

    let index = match VectorIndex::open(&settings.index_dir).await {
        Ok(index) => Some(index),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "vector index unavailable; starting API in degraded mode");
            None
        }
    };

    let responder = match &index {
        Some(index) => match build_responder(&settings, index) {
            Ok(r) => Some(Arc::new(r)),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "query responder unavailable; /ask disabled");
                None
            }
        },
        None => None,
    };

    let state = AppState {
        quotes,
        index,
        responder,
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_responder(settings: &Settings, index: &VectorIndex) -> anyhow::Result<QueryResponder> {
    let embedder = quoterag_core::embed::from_settings(settings)?;
    let llm = Arc::new(HuggingFaceClient::from_settings(settings)?);
    QueryResponder::from_settings(settings, index.clone(), embedder, llm)
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/quotes/:symbol", get(get_quote))
        .route("/ask", post(ask))
        .route("/collections/:name", get(get_collection))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    quotes: Option<Arc<dyn QuoteProvider>>,
    index: Option<VectorIndex>,
    responder: Option<Arc<QueryResponder>>,
}

#[derive(Debug, Deserialize)]
struct QuoteParams {
    exchange: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
    category: Option<&'static str>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn api_error(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: error.into(),
            category: None,
        }),
    )
}

async fn get_quote(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<QuoteParams>,
) -> ApiResult<Vec<QuoteRecord>> {
    let Some(quotes) = &state.quotes else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "quote provider is not configured",
        ));
    };

    let records = quotes
        .fetch_quote(&symbol, params.exchange.as_deref())
        .await
        .map_err(|e| {
            let status = match e {
                FetchError::InvalidSymbol { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            };
            let body = ApiError {
                error: e.to_string(),
                category: Some(e.category()),
            };
            if status.is_server_error() {
                sentry_anyhow::capture_anyhow(&anyhow::Error::new(e));
            }
            (status, Json(body))
        })?;

    if records.is_empty() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no quote data for {symbol}"),
        ));
    }

    let mut out = Vec::with_capacity(records.len());
    for record in records {
        match normalize(&record) {
            Ok(normalized) => out.push(normalized),
            // Search results carry no time fields; those are returned as fetched.
            Err(NormalizeError::MissingField { field }) => {
                tracing::debug!(%symbol, field, "returning quote without normalization");
                out.push(record);
            }
            Err(e @ NormalizeError::InvalidField { .. }) => {
                tracing::error!(%symbol, error = %e, "provider sent an unreadable time field");
                let body = ApiError {
                    error: e.to_string(),
                    category: Some("normalize"),
                };
                sentry_anyhow::capture_anyhow(&anyhow::Error::new(e));
                return Err((StatusCode::BAD_GATEWAY, Json(body)));
            }
        }
    }

    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

async fn ask(State(state): State<AppState>, Json(req): Json<AskRequest>) -> ApiResult<Answer> {
    let Some(responder) = &state.responder else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "query responder is not configured",
        ));
    };
    if req.question.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "question must be non-empty"));
    }

    let answer = responder.answer(&req.question).await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %format!("{e:#}"), "ask failed");
        api_error(StatusCode::BAD_GATEWAY, format!("{e:#}"))
    })?;

    Ok(Json(answer))
}

async fn get_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<CollectionInfo> {
    let Some(index) = &state.index else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "vector index is not available",
        ));
    };

    let info = index.collection(&name).await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "collection lookup failed")
    })?;

    info.map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no collection named {name}")))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
