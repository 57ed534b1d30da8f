use rusqlite::{Connection, TransactionBehavior};
use serde::Deserialize;

use crate::db::{self, queries};
use crate::errors::{AppError, AppResult};
use crate::models::{Actor, Booking, BookingStatus, BookingTransition, DomainEvent, Role};
use crate::services::cancellation::{self, CancellationPolicy, CancellationQuote};
use crate::services::events;
use crate::services::ledger;
use crate::services::registry;
use crate::state::AppState;

/// Optional body of every transition request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionOptions {
    pub reason: Option<String>,
    /// Fail with `StaleState` unless the booking is still at this version.
    pub expected_version: Option<i64>,
}

fn action(target: BookingStatus) -> &'static str {
    match target {
        BookingStatus::Pending => "reopen",
        BookingStatus::Confirmed => "confirm",
        BookingStatus::CheckedIn => "check in",
        BookingStatus::Completed => "complete",
        BookingStatus::Cancelled => "cancel",
    }
}

/// The only edges a booking may move along.
pub fn is_legal_edge(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Pending, Cancelled)
            | (Confirmed, CheckedIn)
            | (Confirmed, Cancelled)
            | (CheckedIn, Completed)
    )
}

fn check_edge(booking: &Booking, target: BookingStatus) -> AppResult<()> {
    if booking.status.is_terminal() || !is_legal_edge(booking.status, target) {
        return Err(AppError::InvalidTransition {
            current: booking.status,
            action: action(target),
        });
    }
    Ok(())
}

/// Guests may only cancel their own booking; staff and owners act on their
/// business's bookings; platform admins never mutate.
fn check_actor(booking: &Booking, target: BookingStatus, actor: &Actor) -> AppResult<()> {
    let allowed = match actor.role {
        Role::Guest => target == BookingStatus::Cancelled && actor.id == booking.guest_id,
        Role::Staff | Role::Owner => actor.works_for(&booking.business_id),
        Role::PlatformAdmin => false,
    };
    if allowed {
        return Ok(());
    }
    tracing::warn!(
        booking_id = %booking.id,
        actor = %actor.id,
        role = actor.role.as_str(),
        action = action(target),
        "transition refused"
    );
    Err(AppError::Unauthorized(format!(
        "{} {} may not {} booking {}",
        actor.role.as_str(),
        actor.id,
        action(target),
        booking.id
    )))
}

/// Decides the next state of `booking` without touching storage.
pub fn plan(
    booking: &Booking,
    target: BookingStatus,
    actor: &Actor,
    reason: Option<String>,
    now: chrono::NaiveDateTime,
    policy: &CancellationPolicy,
) -> AppResult<(Booking, Option<CancellationQuote>)> {
    check_edge(booking, target)?;
    check_actor(booking, target, actor)?;

    let mut next = booking.clone();
    let mut quote = None;

    match target {
        BookingStatus::Confirmed => {
            if !booking.payment_verified && !booking.is_walk_in() {
                return Err(AppError::PaymentNotVerified(booking.id.clone()));
            }
        }
        BookingStatus::Cancelled => {
            let q = cancellation::evaluate(booking, now, policy);
            next.refund_percent = Some(q.refund_percent);
            next.cancellation_reason = reason;
            quote = Some(q);
        }
        _ => {}
    }

    next.status = target;
    next.updated_at = now;
    Ok((next, quote))
}

/// Loads, decides and writes one transition inside the caller's transaction.
fn apply(
    conn: &Connection,
    booking_id: &str,
    target: BookingStatus,
    actor: &Actor,
    opts: &TransitionOptions,
    now: chrono::NaiveDateTime,
    defaults: &CancellationPolicy,
) -> AppResult<(Booking, Option<CancellationQuote>)> {
    let current = queries::get_booking_by_id(conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;

    // A terminal booking reports InvalidTransition whatever version was sent.
    check_edge(&current, target)?;
    if let Some(expected) = opts.expected_version {
        if expected != current.version {
            return Err(AppError::StaleState(booking_id.to_string()));
        }
    }

    let policy = cancellation::policy_for_business(conn, &current.business_id, defaults)?;
    let (mut next, quote) = plan(&current, target, actor, opts.reason.clone(), now, &policy)?;

    if !queries::update_booking_state(conn, &next, current.version)? {
        return Err(AppError::StaleState(booking_id.to_string()));
    }
    next.version = current.version + 1;

    if target == BookingStatus::Cancelled {
        ledger::release(conn, booking_id)?;
    }

    queries::insert_transition(
        conn,
        &BookingTransition {
            booking_id: booking_id.to_string(),
            from_status: Some(current.status),
            to_status: target,
            actor_id: actor.id.clone(),
            actor_role: actor.role.as_str().to_string(),
            reason: opts.reason.clone(),
            created_at: now,
        },
    )?;

    Ok((next, quote))
}

/// Moves a booking to `target` as one atomic read-modify-write.
///
/// Concurrent calls on the same booking serialize on the write lock; the later
/// one is evaluated against the state the earlier one left behind.
pub fn transition(
    state: &AppState,
    booking_id: &str,
    target: BookingStatus,
    actor: &Actor,
    opts: TransitionOptions,
) -> AppResult<Booking> {
    let defaults = state.config.default_policy();

    let result = db::with_busy_retry(state.config.busy_retry_attempts, || {
        let now = state.clock.now();
        let mut conn = state.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = apply(&tx, booking_id, target, actor, &opts, now, &defaults)?;
        tx.commit()?;
        Ok(outcome)
    });

    let (booking, quote) = match result {
        Ok(outcome) => outcome,
        Err(e @ AppError::StaleState(_)) => {
            tracing::warn!(booking_id, action = action(target), "stale booking version");
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    tracing::info!(
        booking_id,
        status = booking.status.as_str(),
        actor = %actor.id,
        version = booking.version,
        "booking transitioned"
    );

    let event = match (target, quote) {
        (BookingStatus::Cancelled, Some(q)) => DomainEvent::Cancelled {
            booking_id: booking.id.clone(),
            refund_percent: q.refund_percent,
            refund_amount: q.refund_amount,
        },
        (BookingStatus::CheckedIn, _) => DomainEvent::CheckedIn {
            booking_id: booking.id.clone(),
        },
        (BookingStatus::Completed, _) => DomainEvent::Completed {
            booking_id: booking.id.clone(),
        },
        _ => DomainEvent::BookingConfirmed {
            booking_id: booking.id.clone(),
        },
    };
    events::emit(state, event);

    Ok(booking)
}

pub fn confirm(state: &AppState, booking_id: &str, actor: &Actor, opts: TransitionOptions) -> AppResult<Booking> {
    transition(state, booking_id, BookingStatus::Confirmed, actor, opts)
}

pub fn check_in(state: &AppState, booking_id: &str, actor: &Actor, opts: TransitionOptions) -> AppResult<Booking> {
    transition(state, booking_id, BookingStatus::CheckedIn, actor, opts)
}

pub fn complete(state: &AppState, booking_id: &str, actor: &Actor, opts: TransitionOptions) -> AppResult<Booking> {
    transition(state, booking_id, BookingStatus::Completed, actor, opts)
}

pub fn cancel(state: &AppState, booking_id: &str, actor: &Actor, opts: TransitionOptions) -> AppResult<Booking> {
    transition(state, booking_id, BookingStatus::Cancelled, actor, opts)
}

/// What cancelling now would refund, without cancelling.
pub fn quote(state: &AppState, booking_id: &str, actor: &Actor) -> AppResult<CancellationQuote> {
    let booking = registry::get(state, booking_id)?;
    registry::authorize_read(actor, &booking)?;

    let policy = {
        let db = state.conn()?;
        cancellation::policy_for_business(&db, &booking.business_id, &state.config.default_policy())?
    };
    Ok(cancellation::evaluate(&booking, state.clock.now(), &policy))
}
