use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use super::authenticate;
use crate::errors::{AppError, AppResult};
use crate::models::{Booking, BookingStatus, BookingTransition, Role};
use crate::services::cancellation::CancellationQuote;
use crate::services::lifecycle::{self, TransitionOptions};
use crate::services::registry::{self, NewBooking};
use crate::state::AppState;

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NewBooking>,
) -> AppResult<(StatusCode, Json<Booking>)> {
    let actor = authenticate(&state, &headers)?;
    let booking = registry::create(&state, req, &actor)?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings?guest_id= | ?unit_id=
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub guest_id: Option<String>,
    pub unit_id: Option<String>,
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> AppResult<Json<Vec<Booking>>> {
    let actor = authenticate(&state, &headers)?;

    let bookings = match (query.guest_id, query.unit_id) {
        (Some(guest_id), None) => {
            if actor.role == Role::Guest && actor.id != guest_id {
                return Err(AppError::Unauthorized(
                    "guests can only list their own bookings".to_string(),
                ));
            }
            registry::list_by_guest(&state, &guest_id)?
        }
        (None, Some(unit_id)) => {
            if actor.role == Role::Guest {
                return Err(AppError::Unauthorized(
                    "guests cannot list a unit's bookings".to_string(),
                ));
            }
            registry::list_by_unit(&state, &unit_id)?
        }
        _ => {
            return Err(AppError::Validation(
                "pass exactly one of guest_id or unit_id".to_string(),
            ))
        }
    };

    // staff only see their own business
    let visible = bookings
        .into_iter()
        .filter(|b| registry::authorize_read(&actor, b).is_ok())
        .collect();
    Ok(Json(visible))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    let actor = authenticate(&state, &headers)?;
    let booking = registry::get(&state, &id)?;
    registry::authorize_read(&actor, &booking)?;
    Ok(Json(booking))
}

// GET /api/bookings/:id/history
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<BookingTransition>>> {
    let actor = authenticate(&state, &headers)?;
    let booking = registry::get(&state, &id)?;
    registry::authorize_read(&actor, &booking)?;
    Ok(Json(registry::history(&state, &id)?))
}

// GET /api/bookings/:id/cancellation-quote
pub async fn cancellation_quote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<CancellationQuote>> {
    let actor = authenticate(&state, &headers)?;
    Ok(Json(lifecycle::quote(&state, &id, &actor)?))
}

// POST /api/bookings/:id/{confirm,check-in,complete,cancel}
async fn run_transition(
    state: Arc<AppState>,
    headers: HeaderMap,
    id: String,
    target: BookingStatus,
    body: Option<Json<TransitionOptions>>,
) -> AppResult<Json<Booking>> {
    let actor = authenticate(&state, &headers)?;
    let opts = body.map(|Json(opts)| opts).unwrap_or_default();
    let booking = lifecycle::transition(&state, &id, target, &actor, opts)?;
    Ok(Json(booking))
}

pub async fn confirm(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<TransitionOptions>>,
) -> AppResult<Json<Booking>> {
    run_transition(state, headers, id, BookingStatus::Confirmed, body).await
}

pub async fn check_in(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<TransitionOptions>>,
) -> AppResult<Json<Booking>> {
    run_transition(state, headers, id, BookingStatus::CheckedIn, body).await
}

pub async fn complete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<TransitionOptions>>,
) -> AppResult<Json<Booking>> {
    run_transition(state, headers, id, BookingStatus::Completed, body).await
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<TransitionOptions>>,
) -> AppResult<Json<Booking>> {
    run_transition(state, headers, id, BookingStatus::Cancelled, body).await
}
