//! HTTP API handlers for hrm-api

pub mod health;
pub mod measurement;
pub mod readings;
pub mod sse;

pub use health::{health_routes, root};
pub use measurement::{get_measurement_status, set_measurement_status};
pub use readings::{create_reading, get_latest_readings, get_reading, list_readings};
pub use sse::reading_stream;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Assemble every route on `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/heartrate", get(list_readings).post(create_reading))
        .route("/heartrate/stream", get(reading_stream))
        .route("/heartrate/latest/:count", get(get_latest_readings))
        .route("/heartrate/:id", get(get_reading))
        .route(
            "/measurement/status",
            get(get_measurement_status).put(set_measurement_status),
        )
        .merge(health_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
