// Pipeline Dashboard - Web Server
// REST API with Axum: every dashboard view plus the Kanban transition

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use pipeline_dashboard::{
    telemetry::{self, Output},
    CompaniesView, Config, DashboardViews, Deal, DealCache, FetchError, ForecastingView, Notification,
    NotificationLog, OverviewView, PerformanceView, PipelineView, ShapeReport, SqliteDealStore,
    TransitionCoordinator, TransitionError, TransitionOutcome, VelocityView, ViewOptions,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<SqliteDealStore>,
    cache: Arc<DealCache>,
    notifications: Arc<NotificationLog>,
    coordinator: Arc<TransitionCoordinator<SqliteDealStore, NotificationLog>>,
    options: ViewOptions,
}

impl AppState {
    fn new(store: SqliteDealStore, options: ViewOptions) -> Self {
        let store = Arc::new(store);
        let cache = Arc::new(DealCache::new());
        let notifications = Arc::new(NotificationLog::new());
        let coordinator = Arc::new(TransitionCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&notifications),
            Arc::clone(&cache),
        ));

        Self {
            store,
            cache,
            notifications,
            coordinator,
            options,
        }
    }

    /// All views over the current snapshot, refetching if invalidated
    async fn views(&self) -> Result<DashboardViews, ApiError> {
        let snapshot = self.cache.load(self.store.as_ref()).await?;
        let statuses = self.store.statuses().map_err(ApiError::internal)?;
        let companies = self.store.companies().map_err(ApiError::internal)?;
        Ok(DashboardViews::new(snapshot, self.options).with_directory(statuses, companies))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    /// Snapshot the data was computed from
    #[serde(skip_serializing_if = "Option::is_none")]
    generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            generation: None,
            fingerprint: None,
            error: None,
        }
    }

    fn from_views(views: &DashboardViews, data: T) -> Self {
        Self {
            generation: Some(views.snapshot().generation),
            fingerprint: Some(views.snapshot().fingerprint.clone()),
            ..Self::ok(data)
        }
    }
}

/// Error response in the same envelope
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: err.to_string(),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        let status = match &err {
            TransitionError::StatusNotFound { .. } => StatusCode::NOT_FOUND,
            TransitionError::AlreadyInProgress { .. } => StatusCode::CONFLICT,
            TransitionError::Lookup(_) | TransitionError::Persistence(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.reason(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, "request failed: {}", self.message);
        }
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            generation: None,
            fingerprint: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Body of POST /api/deals/:id/transition
#[derive(Serialize, Deserialize)]
struct TransitionBody {
    source: String,
    destination: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/deals - Raw deal collection
async fn get_deals(State(state): State<AppState>) -> ApiResult<Vec<Deal>> {
    let views = state.views().await?;
    Ok(Json(ApiResponse::from_views(&views, views.deals().to_vec())))
}

/// GET /api/overview
async fn get_overview(State(state): State<AppState>) -> ApiResult<OverviewView> {
    let views = state.views().await?;
    Ok(Json(ApiResponse::from_views(&views, views.overview())))
}

/// GET /api/pipeline - Kanban columns
async fn get_pipeline(State(state): State<AppState>) -> ApiResult<PipelineView> {
    let views = state.views().await?;
    Ok(Json(ApiResponse::from_views(&views, views.pipeline())))
}

/// GET /api/companies
async fn get_companies(State(state): State<AppState>) -> ApiResult<CompaniesView> {
    let views = state.views().await?;
    Ok(Json(ApiResponse::from_views(&views, views.companies())))
}

/// GET /api/performance
async fn get_performance(State(state): State<AppState>) -> ApiResult<PerformanceView> {
    let views = state.views().await?;
    Ok(Json(ApiResponse::from_views(&views, views.performance())))
}

/// GET /api/forecasting
async fn get_forecasting(State(state): State<AppState>) -> ApiResult<ForecastingView> {
    let views = state.views().await?;
    Ok(Json(ApiResponse::from_views(&views, views.forecasting())))
}

/// GET /api/velocity
async fn get_velocity(State(state): State<AppState>) -> ApiResult<VelocityView> {
    let views = state.views().await?;
    Ok(Json(ApiResponse::from_views(&views, views.velocity())))
}

/// GET /api/data-quality - Anomaly counts for the current snapshot
async fn get_data_quality(State(state): State<AppState>) -> ApiResult<ShapeReport> {
    let views = state.views().await?;
    Ok(Json(ApiResponse::from_views(&views, ShapeReport::inspect(views.deals()))))
}

/// GET /api/notifications - Recent move outcomes, newest first
async fn get_notifications(State(state): State<AppState>) -> ApiResult<Vec<Notification>> {
    Ok(Json(ApiResponse::ok(state.notifications.recent(NotificationLog::DEFAULT_CAPACITY))))
}

/// POST /api/deals/:id/transition - Move a deal to another status column
async fn post_transition(
    State(state): State<AppState>,
    Path(deal_id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> ApiResult<TransitionOutcome> {
    let outcome = state
        .coordinator
        .on_transition(&deal_id, &body.source, &body.destination)
        .await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/deals", get(get_deals))
        .route("/deals/:id/transition", post(post_transition))
        .route("/overview", get(get_overview))
        .route("/pipeline", get(get_pipeline))
        .route("/companies", get(get_companies))
        .route("/performance", get(get_performance))
        .route("/forecasting", get(get_forecasting))
        .route("/velocity", get(get_velocity))
        .route("/data-quality", get(get_data_quality))
        .route("/notifications", get(get_notifications))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[derive(Parser)]
#[command(name = "pipeline-server", version, about = "Pipeline dashboard REST API")]
struct Args {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long)]
    database: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:3000
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database = database;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    telemetry::init(&config.log_filter, Output::Stderr)?;

    println!("🌐 Pipeline Dashboard - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if !config.database.exists() {
        eprintln!("❌ Database not found at {:?}", config.database);
        eprintln!("   Run: pipeline-dashboard import <deals.csv>");
        eprintln!("   to import deals first.");
        std::process::exit(1);
    }

    let store = SqliteDealStore::open(&config.database)?.with_actor("api");
    println!("✓ Database opened: {:?}", config.database);

    let app = build_router(AppState::new(store, config.view_options()));

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    println!("\n🚀 Server running on http://{}", config.bind);
    println!("   API: http://{}/api/overview", config.bind);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
