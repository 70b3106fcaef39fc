//! Readings endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use hrm_common::{IdentifiedReading, Reading};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /heartrate body
#[derive(Debug, Deserialize)]
pub struct CreateReadingRequest {
    pub bpm: i64,
    /// Defaults to the current time
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateReadingResponse {
    pub id: String,
}

/// GET /heartrate
pub async fn list_readings(State(state): State<AppState>) -> ApiResult<Json<Vec<IdentifiedReading>>> {
    Ok(Json(state.readings.get_all_readings().await?))
}

/// POST /heartrate
pub async fn create_reading(
    State(state): State<AppState>,
    Json(request): Json<CreateReadingRequest>,
) -> ApiResult<(StatusCode, Json<CreateReadingResponse>)> {
    let timestamp = request
        .timestamp
        .unwrap_or_else(hrm_common::time::now_rfc3339);
    let reading = Reading::new(Some(request.bpm), Some(timestamp));

    let id = state.readings.add_reading(&reading).await?;
    info!("Reading {} created ({} bpm)", id, request.bpm);
    Ok((StatusCode::CREATED, Json(CreateReadingResponse { id })))
}

/// GET /heartrate/:id
pub async fn get_reading(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<IdentifiedReading>> {
    state
        .readings
        .get_reading_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Reading with ID {} not found", id)))
}

/// GET /heartrate/latest/:count
pub async fn get_latest_readings(
    State(state): State<AppState>,
    Path(count): Path<i64>,
) -> ApiResult<Json<Vec<IdentifiedReading>>> {
    let count = usize::try_from(count)
        .ok()
        .filter(|c| *c > 0)
        .ok_or_else(|| ApiError::BadRequest("Count parameter must be a positive integer".to_string()))?;
    Ok(Json(state.readings.get_latest_readings(count).await?))
}
