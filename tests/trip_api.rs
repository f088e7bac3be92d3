use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use safetrip::{
    AppState, create_router,
    api::TripCreated,
    graph::{GeoNode, GraphBuilder, GraphRouter},
    geometry::Coordinate,
    risk::{RiskFactorProvider, RiskFactors, TransportMode},
    scorer::RouteSafetyScorer,
};
use serde_json::{Value, json};
use tower::ServiceExt;

const A: GeoNode = GeoNode { lat: 45.0, lon: 5.0 };
const B: GeoNode = GeoNode { lat: 45.0, lon: 5.005 };
const C: GeoNode = GeoNode { lat: 45.002, lon: 5.005 };
const D: GeoNode = GeoNode { lat: 45.0, lon: 5.01 };

fn test_app() -> axum::Router {
    let mut builder = GraphBuilder::new();
    let dark: HashMap<&str, &str> = [("highway", "residential"), ("lit", "no"), ("name", "Dark Street")]
        .into_iter()
        .collect();
    let lit: HashMap<&str, &str> = [("highway", "footway"), ("lit", "yes"), ("name", "Garden Walk")]
        .into_iter()
        .collect();
    builder.add_way(&[(1, A), (2, B), (4, D)], &dark);
    builder.add_way(&[(1, A), (3, C), (4, D)], &lit);
    let router = GraphRouter::new(Arc::new(builder.build()));

    let scorer = RouteSafetyScorer::with_defaults(Arc::new(DarkCorridor));
    create_router(AppState::new(Arc::new(router), Arc::new(scorer)))
}

/// Everything along the straight street between A and D is dangerous.
struct DarkCorridor;

#[async_trait]
impl RiskFactorProvider for DarkCorridor {
    async fn risk(&self, at: Coordinate, _mode: TransportMode) -> RiskFactors {
        let v = if at.lat < 45.0005 && at.lon > 5.001 && at.lon < 5.009 { 1.0 } else { 0.1 };
        RiskFactors {
            incident: v,
            lighting: v,
            crime: v,
            weather: v,
        }
    }
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn start_trip(app: &axum::Router) -> String {
    let (status, body) = send(app, "POST", "/trips", None).await;
    assert_eq!(status, StatusCode::CREATED);
    let created: TripCreated = serde_json::from_value(body).unwrap();
    created.id.to_string()
}

fn route_body(mode: &str) -> Value {
    json!({
        "origin": {"lat": A.lat, "lon": A.lon},
        "destination": {"lat": D.lat, "lon": D.lon},
        "mode": mode
    })
}

#[tokio::test]
async fn health_check() {
    let app = test_app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn walking_trip_prefers_detour_around_dark_street() {
    let app = test_app();
    let id = start_trip(&app).await;

    let (status, state) = send(&app, "POST", &format!("/trips/{id}/route"), Some(route_body("walk"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["phase"], "has_route");
    assert_eq!(state["is_calculating"], false);
    assert!(state["last_error"].is_null());

    let coords = state["selected_path"]["coordinates"].as_array().unwrap();
    assert!(coords.iter().any(|c| c["lat"].as_f64() == Some(C.lat)));
    assert_eq!(state["steps"][0]["instruction"], "Head along Garden Walk");
}

#[tokio::test]
async fn driving_trip_tracks_position() {
    let app = test_app();
    let id = start_trip(&app).await;

    let (_, state) = send(&app, "POST", &format!("/trips/{id}/route"), Some(route_body("drive"))).await;
    assert_eq!(state["phase"], "has_route");
    let total = state["remaining_distance_m"].as_f64().unwrap();
    assert_eq!(state["remaining_distance_text"], format!("{} m", total as i64));

    let (status, state) = send(
        &app,
        "POST",
        &format!("/trips/{id}/position"),
        Some(json!({"lat": B.lat, "lon": B.lon})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let remaining = state["remaining_distance_m"].as_f64().unwrap();
    assert!(remaining > 0.0 && remaining < total);
    assert!(state["remaining_eta_s"].as_f64().unwrap() > 0.0);
    assert!(state["arrival_at"].is_string());
}

#[tokio::test]
async fn clear_and_end_trip() {
    let app = test_app();
    let id = start_trip(&app).await;
    send(&app, "POST", &format!("/trips/{id}/route"), Some(route_body("walk"))).await;

    let (status, state) = send(&app, "POST", &format!("/trips/{id}/clear"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["phase"], "idle");
    assert!(state["selected_path"].is_null());
    assert_eq!(state["remaining_distance_text"], "–");
    assert!(state["arrival_at"].is_null());

    let (status, _) = send(&app, "DELETE", &format!("/trips/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "GET", &format!("/trips/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains(&id));
}

#[tokio::test]
async fn route_far_from_network_reports_provider_failure() {
    let app = test_app();
    let id = start_trip(&app).await;

    let body = json!({
        "origin": {"lat": 91.0, "lon": 5.0},
        "destination": {"lat": D.lat, "lon": D.lon},
        "mode": "walk"
    });
    let (status, state) = send(&app, "POST", &format!("/trips/{id}/route"), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["phase"], "failed");
    assert_eq!(state["last_error"]["kind"], "routing_provider_failure");
    assert_eq!(state["last_error"]["code"], 503);
    assert!(state["selected_path"].is_null());
}
