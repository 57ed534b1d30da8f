pub mod bookings;
pub mod events;
pub mod health;
pub mod payments;
pub mod reviews;
pub mod units;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::errors::{AppError, AppResult};
use crate::models::{Actor, Role};
use crate::state::AppState;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_BUSINESS_HEADER: &str = "x-actor-business";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/units", post(units::upsert_unit))
        .route("/api/units/:id", get(units::get_unit))
        .route("/api/units/:id/status", post(units::set_status))
        .route("/api/units/:id/calendar", get(units::calendar))
        .route("/api/units/:id/availability", get(units::availability))
        .route(
            "/api/bookings",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route("/api/bookings/:id", get(bookings::get_booking))
        .route("/api/bookings/:id/history", get(bookings::get_history))
        .route(
            "/api/bookings/:id/cancellation-quote",
            get(bookings::cancellation_quote),
        )
        .route("/api/bookings/:id/confirm", post(bookings::confirm))
        .route("/api/bookings/:id/check-in", post(bookings::check_in))
        .route("/api/bookings/:id/complete", post(bookings::complete))
        .route("/api/bookings/:id/cancel", post(bookings::cancel))
        .route(
            "/api/bookings/:id/payment-proof",
            post(payments::submit_proof).get(payments::latest_proof),
        )
        .route("/api/bookings/:id/payment/verify", post(payments::verify))
        .route("/api/bookings/:id/review", post(reviews::submit_review))
        .route("/api/reviews/:id", put(reviews::edit_review))
        .route(
            "/api/businesses/:id/reviews",
            get(reviews::business_reviews),
        )
        .route("/api/events/stream", get(events::events_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn check_auth(headers: &HeaderMap, expected_token: &str) -> AppResult<()> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthenticated);
    }
    Ok(())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The calling API layer vouches for the end user through these headers.
pub fn actor_from_headers(headers: &HeaderMap) -> AppResult<Actor> {
    let id = header(headers, ACTOR_ID_HEADER).ok_or(AppError::Unauthenticated)?;
    let role = header(headers, ACTOR_ROLE_HEADER)
        .and_then(Role::parse)
        .ok_or(AppError::Unauthenticated)?;
    let business_id = header(headers, ACTOR_BUSINESS_HEADER).map(str::to_string);

    if matches!(role, Role::Staff | Role::Owner) && business_id.is_none() {
        return Err(AppError::Validation(format!(
            "{} actors need the {ACTOR_BUSINESS_HEADER} header",
            role.as_str()
        )));
    }

    Ok(Actor {
        id: id.to_string(),
        role,
        business_id,
    })
}

/// Token check plus actor resolution, the preamble of every `/api` handler.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<Actor> {
    check_auth(headers, &state.config.api_token)?;
    actor_from_headers(headers)
}
