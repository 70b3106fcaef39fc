//! Measurement control endpoints

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::measurement::MeasurementControl;
use crate::AppState;

/// PUT /measurement/status body
#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub is_paused: bool,
    #[serde(default)]
    pub updated_by: Option<String>,
}

/// GET /measurement/status
pub async fn get_measurement_status(State(state): State<AppState>) -> ApiResult<Json<MeasurementControl>> {
    Ok(Json(state.measurement.get_status().await?))
}

/// PUT /measurement/status
pub async fn set_measurement_status(
    State(state): State<AppState>,
    Json(request): Json<SetStatusRequest>,
) -> ApiResult<Json<MeasurementControl>> {
    let control = state
        .measurement
        .set_status(request.is_paused, request.updated_by)
        .await?;
    Ok(Json(control))
}
