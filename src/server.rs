use crate::config::AppConfig;
use crate::data::Datasets;
use crate::error::PipelineError;
use crate::export::{drawn_coordinates, to_csv_string};
use crate::filter::{Choices, Selection, SelectionRequest};
use crate::join::JoinedSet;
use crate::pipeline;
use crate::processing::{ChartRow, DemographicTotals, PopulationSummary};
use crate::render::{point_layer, polygon_layer, MapView};
use crate::session::{Credentials, SessionInfo, SessionStore};
use crate::source::Fetch;
use crate::types::{valid_coordinate, PointCollection};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use geojson::{FeatureCollection, GeoJson};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

pub struct AppState {
    pub config: AppConfig,
    pub datasets: Datasets,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: AppConfig, fetcher: Arc<dyn Fetch>) -> Self {
        let datasets = Datasets::new(fetcher, config.schema.clone());
        let sessions = SessionStore::new(Credentials::from_users(&config.users));
        Self {
            config,
            datasets,
            sessions,
        }
    }
}

/// Handler failure, rendered as a status code and a JSON `{error}` body.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::DataUnavailable { .. } | PipelineError::UnsupportedCrs(_) => {
                ApiError::Unavailable(e.to_string())
            }
            PipelineError::InvalidCoordinate { .. } => ApiError::BadRequest(e.to_string()),
            PipelineError::Export(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
pub struct NewPoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Serialize)]
pub struct PointCount {
    points: usize,
}

/// Everything the dashboard draws for one selection.
#[derive(Serialize)]
pub struct SelectionResponse {
    selection: Selection,
    choices: Choices,
    no_data: bool,
    points_available: bool,
    polygons: FeatureCollection,
    points: FeatureCollection,
    joined: JoinedSet,
    totals: DemographicTotals,
    population: PopulationSummary,
    chart: Vec<ChartRow>,
    view: Option<MapView>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.server.static_dir);
    Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/selection", get(selection))
        .route("/api/points", post(add_point))
        .route("/api/export", post(export_csv))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], state.config.server.port));
    let app = router(state);

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<SessionInfo>, ApiError> {
    state
        .sessions
        .login(&body.username, &body.password)
        .map(Json)
        .ok_or(ApiError::Unauthorized)
}

async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers)?;
    if state.sessions.logout(token) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::Unauthorized)
    }
}

async fn selection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(request): Query<SelectionRequest>,
) -> Result<Json<SelectionResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    blocking(state, move |state| build_selection(state, token, &request))
        .await
        .map(Json)
}

async fn add_point(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewPoint>,
) -> Result<Json<PointCount>, ApiError> {
    let token = bearer_token(&headers)?;
    blocking(state, move |state| append_point(state, token, body))
        .await
        .map(|points| Json(PointCount { points }))
}

async fn export_csv(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)?;
    require_session(&state, token)?;

    let drawn: GeoJson = body
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid GeoJSON: {}", e)))?;
    let csv = to_csv_string(&drawn_coordinates(drawn))?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"coordinates.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

// Dataset fetches use a blocking client, so the work runs off the async workers.
async fn blocking<T, F>(state: Arc<AppState>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

fn bearer_token(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|t| Uuid::parse_str(t.trim()).ok())
        .ok_or(ApiError::Unauthorized)
}

fn require_session(state: &AppState, token: Uuid) -> Result<(), ApiError> {
    state
        .sessions
        .with_session(token, |_| ())
        .ok_or(ApiError::Unauthorized)
}

fn build_selection(
    state: &AppState,
    token: Uuid,
    request: &SelectionRequest,
) -> Result<SelectionResponse, ApiError> {
    require_session(state, token)?;
    let boundaries = state.datasets.load_boundaries(&state.config.input.boundaries)?;

    let loaded = state.datasets.load_points(&state.config.input.points);
    if let Err(e) = &loaded {
        warn!("Continuing without concession points: {}", e);
    }
    let points = state
        .sessions
        .with_session(token, |session| match &loaded {
            Ok(load) => session.points(|| load.to_collection()),
            Err(_) => session
                .loaded_points()
                .unwrap_or_else(|| Arc::new(PointCollection::empty())),
        })
        .ok_or(ApiError::Unauthorized)?;

    let report = pipeline::run(
        &boundaries.records,
        &points,
        request,
        state.config.join.options(),
        &state.config.chart.labels,
    );
    state.sessions.with_session(token, |session| {
        session.selection = report.cascade.selection.clone();
    });

    Ok(SelectionResponse {
        no_data: report.is_empty(),
        points_available: loaded.is_ok(),
        polygons: polygon_layer(&report.cascade.records),
        points: point_layer(&points.records),
        selection: report.cascade.selection,
        choices: report.cascade.choices,
        joined: report.joined,
        totals: report.totals,
        population: report.population,
        chart: report.chart,
        view: report.view,
    })
}

fn append_point(state: &AppState, token: Uuid, point: NewPoint) -> Result<usize, ApiError> {
    let NewPoint {
        latitude,
        longitude,
    } = point;
    require_session(state, token)?;
    if !valid_coordinate(latitude, longitude) {
        return Err(PipelineError::InvalidCoordinate {
            latitude,
            longitude,
        }
        .into());
    }

    let loaded = state.datasets.load_points(&state.config.input.points);
    let count = state
        .sessions
        .with_session(token, |session| match &loaded {
            Ok(load) => session.append_point(latitude, longitude, || load.to_collection()),
            // Seeding with an empty set would hide the source points for the whole session.
            Err(e) if !session.has_points() => Err(e.clone()),
            Err(_) => session.append_point(latitude, longitude, PointCollection::empty),
        })
        .ok_or(ApiError::Unauthorized)??;
    Ok(count)
}
