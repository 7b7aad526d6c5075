pub mod bookings;
pub mod drivers;
pub mod ws;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::notify::ConnectionInfo;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(bookings::router())
        .merge(drivers::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws/:driver_id", get(ws::ws_handler))
        .route(
            "/connections",
            get(list_connections),
        )
        .route(
            "/connections/:driver_id",
            get(connection_status).delete(disconnect),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    bookings: usize,
    drivers: usize,
    connected_drivers: usize,
}

#[derive(Serialize)]
struct ConnectionStatus {
    driver_id: Uuid,
    connected: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        bookings: state.bookings.len(),
        drivers: state.drivers.len(),
        connected_drivers: state.notifier.connected_count(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}

async fn list_connections(State(state): State<Arc<AppState>>) -> Json<Vec<ConnectionInfo>> {
    Json(state.notifier.connections())
}

async fn connection_status(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<Uuid>,
) -> Json<ConnectionStatus> {
    Json(ConnectionStatus {
        driver_id,
        connected: state.notifier.is_connected(driver_id),
    })
}

async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<Uuid>,
) -> StatusCode {
    state.notifier.unsubscribe(driver_id);
    state
        .metrics
        .connected_drivers
        .set(state.notifier.connected_count() as i64);
    StatusCode::NO_CONTENT
}
