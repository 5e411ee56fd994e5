mod cache;
mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use ner::{
    CategoryReport, ENTITY_TYPES, EntityType, Extractor, ItemizedEntity, MatchMode, NerError,
    OllamaClient, TextGenerator, TgiClient,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cache::{Cache, CachedGenerator};
use config::{AppConfig, BackendKind};
use metrics::{Metrics, MetricsSnapshot, TimedOperation};

type ServiceExtractor = Extractor<CachedGenerator<Arc<dyn TextGenerator>>>;

struct AppState {
    extractor: ServiceExtractor,
    metrics: Arc<Metrics>,
}

#[derive(Deserialize)]
struct ExtractRequest {
    text: String,
    /// Defaults to the configured categories.
    entity_types: Option<Vec<String>>,
    match_mode: Option<MatchMode>,
}

#[derive(Serialize)]
struct ExtractResponse {
    request_id: Uuid,
    entities: Vec<ItemizedEntity>,
    outcomes: Vec<CategoryReport>,
    backend_unavailable: bool,
}

#[derive(Serialize)]
struct EntityTypesResponse {
    configured: Vec<EntityType>,
    supported: Vec<EntityType>,
}

#[derive(Serialize)]
struct HealthResponse {
    backend: String,
    status: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<NerError> for ApiError {
    fn from(e: NerError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(
        mode = ?config.mode,
        backend = ?config.backend.kind,
        base_url = %config.backend.base_url,
        "Configuration loaded"
    );

    let state = Arc::new(build_state(&config)?);

    match state.extractor.generator().health().await {
        Ok(()) => info!("Model backend reachable"),
        Err(e) => warn!(error = %e, "Model backend not reachable yet"),
    }

    let app = app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    info!("Server listening on http://{}", config.bind);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("NER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_generator(config: &AppConfig) -> Arc<dyn TextGenerator> {
    let timeout = Duration::from_secs(config.concurrency.request_timeout_secs);
    let backend = &config.backend;
    match backend.kind {
        BackendKind::Tgi => Arc::new(TgiClient::new(
            backend.base_url.as_str(),
            backend.context_window,
            timeout,
        )),
        BackendKind::Ollama => Arc::new(OllamaClient::new(
            backend.base_url.as_str(),
            backend.model.as_str(),
            backend.context_window,
            timeout,
        )),
    }
}

fn build_state(config: &AppConfig) -> Result<AppState> {
    with_generator(config, build_generator(config))
}

fn with_generator(config: &AppConfig, generator: Arc<dyn TextGenerator>) -> Result<AppState> {
    let cache = config
        .cache
        .enabled
        .then(|| Arc::new(Cache::new(config.cache.max_entries)));
    let extractor = Extractor::new(
        CachedGenerator::new(generator, cache),
        config.extractor_config()?,
    )
    .context("Failed to build extractor")?;

    Ok(AppState {
        extractor,
        metrics: Metrics::new(),
    })
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/extract", post(extract_entities))
        .route("/entity-types", get(entity_types))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn extract_entities(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExtractRequest>, JsonRejection>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("extract", %request_id);

    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            state.metrics.record_request(false);
            let _guard = span.enter();
            warn!(error = %rejection.body_text(), "Rejected malformed extraction request");
            return Err(rejection.into());
        }
    };

    async move {
        let timer = TimedOperation::start();
        let config = state.extractor.config();

        let result = match &req.entity_types {
            Some(labels) => EntityType::parse_list(labels),
            None => Ok(config.entity_types.clone()),
        };
        let result = match result {
            Ok(entity_types) => {
                let match_mode = req.match_mode.unwrap_or(config.match_mode);
                state
                    .extractor
                    .run_with(&req.text, &entity_types, match_mode)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(report) => {
                let failed = report
                    .outcomes
                    .iter()
                    .filter(|r| r.outcome.is_failure())
                    .count();
                state.metrics.record_request(true);
                state
                    .metrics
                    .record_extract(timer.elapsed(), report.entities.len(), failed);

                let backend_unavailable = report.backend_unavailable();
                if backend_unavailable {
                    warn!("Every category failed, model backend looks unavailable");
                }

                Ok(Json(ExtractResponse {
                    request_id,
                    backend_unavailable,
                    entities: report.entities,
                    outcomes: report.outcomes,
                }))
            }
            Err(e) => {
                state.metrics.record_request(false);
                warn!(error = %e, "Rejected extraction request");
                Err(e.into())
            }
        }
    }
    .instrument(span)
    .await
}

async fn entity_types(State(state): State<Arc<AppState>>) -> Json<EntityTypesResponse> {
    Json(EntityTypesResponse {
        configured: state.extractor.config().entity_types.clone(),
        supported: ENTITY_TYPES.to_vec(),
    })
}

async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let generator = state.extractor.generator();
    let (code, status) = match generator.health().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("error: {}", e)),
    };

    (
        code,
        Json(HealthResponse {
            backend: generator.name().to_string(),
            status,
        }),
    )
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    let cache = state.extractor.generator().cache().map(|c| c.stats());
    Json(state.metrics.snapshot(cache))
}
