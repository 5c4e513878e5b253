use crate::{
    app::App,
    errors::AppError,
    semantic::{SearchHit, SyncReport, TemplateInfo},
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    app: Arc<App>,
}

async fn start_app(app: App) {
    let app = Arc::new(app);

    let signal = shutdown_signal(app.clone());
    let shared_state = Arc::new(SharedState { app: app.clone() });

    async fn shutdown_signal(app: Arc<App>) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        log::warn!("shutting down, flushing index");
        app.request_cancel();
        app.shutdown();
    }

    let router = Router::new()
        .route("/api/search", get(search))
        .route("/api/templates", get(list_templates))
        .route("/api/templates/:id", get(get_template))
        .route("/api/sync/rebuild", post(rebuild))
        .route("/api/sync/repair", post(repair))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
    log::info!("listening on 0.0.0.0:8080");
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await
        .unwrap();
}

pub fn start_daemon(app: App) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(app).await });
}

// Wraps `AppError` so axum can turn it into a response.
#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self.0 {
            AppError::NotFound => (
                axum::http::StatusCode::NOT_FOUND,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            AppError::Validation(_) => (
                axum::http::StatusCode::BAD_REQUEST,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            _ => {
                log::error!("{self:?}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": self.0.to_string()}).to_string(),
                )
            }
        }
        .into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    pub q: String,

    /// Maximum number of results
    pub n: Option<usize>,

    /// Only templates added on or after this date (YYYY-MM-DD)
    pub from: Option<String>,

    /// Only templates added on or before this date (YYYY-MM-DD)
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<SearchParams>,
) -> Result<axum::Json<SearchResponse>, HttpError> {
    let app = state.app.clone();

    log::debug!("params: {params:?}");

    tokio::task::block_in_place(move || {
        app.search_templates(
            &params.q,
            params.n,
            params.from.as_deref(),
            params.to.as_deref(),
        )
        .map(|results| SearchResponse { results }.into())
        .map_err(Into::into)
    })
}

async fn list_templates(
    State(state): State<Arc<SharedState>>,
) -> Result<axum::Json<Vec<String>>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || Ok(app.list_template_ids().into()))
}

async fn get_template(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> Result<axum::Json<TemplateInfo>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || app.get_template(&id).map(Into::into).map_err(Into::into))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RebuildRequest {
    /// Refetch source pages even when scraped content is already present
    #[serde(default)]
    pub force_rescrape: bool,
}

async fn rebuild(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<RebuildRequest>,
) -> Result<axum::Json<SyncReport>, HttpError> {
    let app = state.app.clone();

    log::debug!("payload: {payload:?}");

    tokio::task::block_in_place(move || {
        app.rebuild(payload.force_rescrape)
            .map(Into::into)
            .map_err(Into::into)
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepairRequest {
    #[serde(default)]
    pub force_rescrape: bool,

    /// Process missing templates in chunks of this size
    #[serde(default)]
    pub batch_size: Option<usize>,
}

async fn repair(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<RepairRequest>,
) -> Result<axum::Json<SyncReport>, HttpError> {
    let app = state.app.clone();

    log::debug!("payload: {payload:?}");

    tokio::task::block_in_place(move || {
        app.repair(payload.force_rescrape, payload.batch_size)
            .map(Into::into)
            .map_err(Into::into)
    })
}
