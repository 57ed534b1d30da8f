use chrono::Duration;
use rusqlite::{ErrorCode, TransactionBehavior};

use crate::db::{self, queries};
use crate::errors::{AppError, AppResult};
use crate::models::{Actor, BookingStatus, DomainEvent, RatingSummary, Review};
use crate::services::events;
use crate::state::AppState;

fn validate(rating: u8, comment: &str) -> AppResult<()> {
    if !(1..=5).contains(&rating) {
        return Err(AppError::Validation("rating must be between 1 and 5".to_string()));
    }
    if comment.chars().count() > 2000 {
        return Err(AppError::Validation("comment is too long".to_string()));
    }
    Ok(())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

/// One review per completed booking, written by the booking's own guest.
pub fn submit_review(
    state: &AppState,
    booking_id: &str,
    rating: u8,
    comment: &str,
    actor: &Actor,
) -> AppResult<Review> {
    validate(rating, comment)?;

    let review = db::with_busy_retry(state.config.busy_retry_attempts, || {
        let now = state.clock.now();
        let mut conn = state.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let booking = queries::get_booking_by_id(&tx, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
        if !actor.is_guest() || booking.guest_id != actor.id {
            return Err(AppError::ReviewNotEligible(format!(
                "{} is not the guest of booking {booking_id}",
                actor.id
            )));
        }
        if booking.status != BookingStatus::Completed {
            return Err(AppError::ReviewNotEligible(format!(
                "booking {booking_id} is {}, not completed",
                booking.status
            )));
        }
        if queries::get_review_for_booking(&tx, booking_id)?.is_some() {
            return Err(AppError::ReviewAlreadyExists(booking_id.to_string()));
        }

        let review = Review {
            id: uuid::Uuid::new_v4().to_string(),
            booking_id: booking_id.to_string(),
            guest_id: actor.id.clone(),
            business_id: booking.business_id.clone(),
            rating,
            comment: comment.trim().to_string(),
            created_at: now,
            updated_at: now,
        };
        match queries::insert_review(&tx, &review) {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::ReviewAlreadyExists(booking_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;
        Ok(review)
    })?;

    tracing::info!(review_id = %review.id, booking_id, rating, "review created");

    events::emit(
        state,
        DomainEvent::ReviewCreated {
            review_id: review.id.clone(),
            booking_id: booking_id.to_string(),
            rating,
        },
    );

    Ok(review)
}

/// Only the author may edit, and only inside the edit window; anything else
/// is reported as an expired window.
pub fn edit_review(
    state: &AppState,
    review_id: &str,
    rating: u8,
    comment: &str,
    actor: &Actor,
) -> AppResult<Review> {
    validate(rating, comment)?;
    let window = Duration::hours(state.config.review_edit_window_hours);

    let review = db::with_busy_retry(state.config.busy_retry_attempts, || {
        let now = state.clock.now();
        let mut conn = state.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut review = queries::get_review(&tx, review_id)?
            .ok_or_else(|| AppError::NotFound(format!("review {review_id}")))?;
        if !actor.is_guest() || review.guest_id != actor.id {
            tracing::warn!(review_id, actor = %actor.id, "edit by non-author refused");
            return Err(AppError::EditWindowExpired(format!(
                "{review_id} is not editable by {}",
                actor.id
            )));
        }
        if now - review.created_at >= window {
            return Err(AppError::EditWindowExpired(review_id.to_string()));
        }

        review.rating = rating;
        review.comment = comment.trim().to_string();
        review.updated_at = now;
        queries::update_review(&tx, &review)?;

        tx.commit()?;
        Ok(review)
    })?;

    tracing::info!(review_id, rating, "review edited");

    events::emit(
        state,
        DomainEvent::ReviewEdited {
            review_id: review.id.clone(),
            rating,
        },
    );

    Ok(review)
}

pub fn business_reviews(state: &AppState, business_id: &str) -> AppResult<(RatingSummary, Vec<Review>)> {
    let db = state.conn()?;
    let summary = queries::get_rating_summary(&db, business_id)?;
    let reviews = queries::get_reviews_for_business(&db, business_id)?;
    Ok((summary, reviews))
}
