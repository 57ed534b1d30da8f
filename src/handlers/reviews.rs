use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::authenticate;
use crate::errors::AppResult;
use crate::models::{RatingSummary, Review};
use crate::services::reputation;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

// POST /api/bookings/:id/review
pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> AppResult<(StatusCode, Json<Review>)> {
    let actor = authenticate(&state, &headers)?;
    let review = reputation::submit_review(&state, &booking_id, req.rating, &req.comment, &actor)?;
    Ok((StatusCode::CREATED, Json(review)))
}

// PUT /api/reviews/:id
pub async fn edit_review(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(review_id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> AppResult<Json<Review>> {
    let actor = authenticate(&state, &headers)?;
    let review = reputation::edit_review(&state, &review_id, req.rating, &req.comment, &actor)?;
    Ok(Json(review))
}

// GET /api/businesses/:id/reviews
#[derive(Serialize)]
pub struct BusinessReviewsResponse {
    pub summary: RatingSummary,
    pub reviews: Vec<Review>,
}

pub async fn business_reviews(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(business_id): Path<String>,
) -> AppResult<Json<BusinessReviewsResponse>> {
    authenticate(&state, &headers)?;
    let (summary, reviews) = reputation::business_reviews(&state, &business_id)?;
    Ok(Json(BusinessReviewsResponse { summary, reviews }))
}
