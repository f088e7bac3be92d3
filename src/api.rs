use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::geometry::Coordinate;
use crate::risk::TransportMode;
use crate::routing::RoutingProvider;
use crate::scorer::RouteSafetyScorer;
use crate::trip::{TripRouteCoordinator, TripState};

/// Shared by all handlers; each trip owns its own coordinator.
#[derive(Clone)]
pub struct AppState {
    router: Arc<dyn RoutingProvider>,
    scorer: Arc<RouteSafetyScorer>,
    trips: Arc<RwLock<HashMap<Uuid, Arc<TripRouteCoordinator>>>>,
}

impl AppState {
    pub fn new(router: Arc<dyn RoutingProvider>, scorer: Arc<RouteSafetyScorer>) -> Self {
        Self {
            router,
            scorer,
            trips: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn trip(&self, id: Uuid) -> Result<Arc<TripRouteCoordinator>, ApiError> {
        self.trips
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ApiError::TripNotFound(id))
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/trips", post(start_trip))
        .route("/trips/:id", get(trip_state).delete(end_trip))
        .route("/trips/:id/route", post(calculate_route))
        .route("/trips/:id/position", post(update_position))
        .route("/trips/:id/clear", post(clear_route))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- API DTOs ---

#[derive(Debug, Serialize, Deserialize)]
pub struct TripCreated {
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RouteRequest {
    pub origin: Coordinate,
    pub destination: Coordinate,
    #[serde(default)]
    pub mode: TransportMode,
}

/// TripState plus the display values the panel shows.
#[derive(Debug, Serialize)]
pub struct TripView {
    #[serde(flatten)]
    pub state: TripState,
    pub remaining_distance_text: String,
    pub arrival_at: Option<DateTime<Utc>>,
}

impl From<TripState> for TripView {
    fn from(state: TripState) -> Self {
        let remaining_distance_text = state.remaining_distance_text();
        let arrival_at = state.arrival_at(Utc::now());
        Self {
            state,
            remaining_distance_text,
            arrival_at,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    TripNotFound(Uuid),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::TripNotFound(id) => (StatusCode::NOT_FOUND, format!("unknown trip {id}")),
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

// --- Handlers ---

async fn start_trip(State(state): State<AppState>) -> (StatusCode, Json<TripCreated>) {
    let id = Uuid::new_v4();
    let coordinator = TripRouteCoordinator::new(Arc::clone(&state.router), Arc::clone(&state.scorer));
    state.trips.write().await.insert(id, Arc::new(coordinator));
    info!(%id, "trip started");
    (StatusCode::CREATED, Json(TripCreated { id }))
}

async fn trip_state(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<Uuid>,
) -> Result<Json<TripView>, ApiError> {
    let trip = state.trip(id).await?;
    Ok(Json(trip.snapshot().into()))
}

async fn end_trip(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    let trip = state
        .trips
        .write()
        .await
        .remove(&id)
        .ok_or(ApiError::TripNotFound(id))?;
    // Anything still in flight for this trip must not publish.
    trip.clear_route();
    info!(%id, "trip ended");
    Ok(StatusCode::NO_CONTENT)
}

async fn calculate_route(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<Uuid>,
    Json(req): Json<RouteRequest>,
) -> Result<Json<TripView>, ApiError> {
    let trip = state.trip(id).await?;
    trip.calculate_route(req.origin, req.destination, req.mode).await;
    Ok(Json(trip.snapshot().into()))
}

async fn update_position(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<Uuid>,
    Json(position): Json<Coordinate>,
) -> Result<Json<TripView>, ApiError> {
    let trip = state.trip(id).await?;
    trip.update_distance_and_eta(position);
    Ok(Json(trip.snapshot().into()))
}

async fn clear_route(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<Uuid>,
) -> Result<Json<TripView>, ApiError> {
    let trip = state.trip(id).await?;
    trip.clear_route();
    Ok(Json(trip.snapshot().into()))
}
