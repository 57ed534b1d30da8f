use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::authenticate;
use crate::errors::AppResult;
use crate::models::{Unit, UnitStatus};
use crate::services::ledger::AvailabilityWindow;
use crate::services::units::{self, UnitInput};
use crate::state::AppState;

// POST /api/units
pub async fn upsert_unit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<UnitInput>,
) -> AppResult<Json<Unit>> {
    let actor = authenticate(&state, &headers)?;
    Ok(Json(units::upsert_unit(&state, input, &actor)?))
}

// GET /api/units/:id
pub async fn get_unit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Unit>> {
    authenticate(&state, &headers)?;
    Ok(Json(units::get_unit(&state, &id)?))
}

// POST /api/units/:id/status
#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: UnitStatus,
    pub available: bool,
}

pub async fn set_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> AppResult<Json<Unit>> {
    let actor = authenticate(&state, &headers)?;
    Ok(Json(units::set_unit_status(&state, &id, req.status, req.available, &actor)?))
}

// GET /api/units/:id/calendar
pub async fn calendar(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<AvailabilityWindow>>> {
    authenticate(&state, &headers)?;
    Ok(Json(units::calendar(&state, &id)?))
}

// GET /api/units/:id/availability?start=&end=
#[derive(Deserialize)]
pub struct RangeQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub unit_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub free: bool,
}

pub async fn availability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> AppResult<Json<AvailabilityResponse>> {
    authenticate(&state, &headers)?;
    let free = units::is_range_free(&state, &id, range.start, range.end)?;
    Ok(Json(AvailabilityResponse {
        unit_id: id,
        start: range.start,
        end: range.end,
        free,
    }))
}
