use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};
use serde::Deserialize;

use crate::db::{self, queries};
use crate::errors::{AppError, AppResult};
use crate::models::{Actor, Booking, BookingStatus, BookingTransition, CreatedBy, DomainEvent, Role, Unit};
use crate::services::capability::Module;
use crate::services::events;
use crate::services::ledger::{self, ReserveError};
use crate::state::AppState;

/// Largest accepted `total_price`, in minor currency units.
pub const MAX_TOTAL_PRICE: i64 = 1_000_000_000_000_000;

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub unit_id: String,
    /// Required for walk-ins; guests always book for themselves.
    pub guest_id: Option<String>,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub total_price: i64,
    pub guest_count: Option<i32>,
}

/// Creates a booking and reserves its dates in one transaction.
///
/// Guests get a `Pending` booking awaiting payment. Staff and owners create
/// walk-ins, which start `Confirmed` with payment already settled.
pub fn create(state: &AppState, req: NewBooking, actor: &Actor) -> AppResult<Booking> {
    let walk_in = actor.is_staff();
    let guest_id = match actor.role {
        Role::Guest => {
            if req.guest_id.as_deref().is_some_and(|g| g != actor.id) {
                return Err(AppError::Unauthorized(
                    "guests can only book for themselves".to_string(),
                ));
            }
            actor.id.clone()
        }
        Role::Staff | Role::Owner => req
            .guest_id
            .clone()
            .filter(|g| !g.trim().is_empty())
            .ok_or_else(|| AppError::Validation("walk-in bookings need a guest_id".to_string()))?,
        Role::PlatformAdmin => {
            return Err(AppError::Unauthorized(
                "platform admins cannot create bookings".to_string(),
            ))
        }
    };

    let now = state.clock.now();
    validate_dates(&req, now, walk_in, state.config.check_in_hour)?;
    if req.total_price <= 0 {
        return Err(AppError::Validation("total_price must be positive".to_string()));
    }
    if req.total_price > MAX_TOTAL_PRICE {
        return Err(AppError::Validation(format!(
            "total_price must not exceed {MAX_TOTAL_PRICE}"
        )));
    }

    let unit = {
        let db = state.conn()?;
        queries::get_unit(&db, &req.unit_id)?
    }
    .ok_or_else(|| AppError::NotFound(format!("unit {}", req.unit_id)))?;

    if walk_in && !actor.works_for(&unit.business_id) {
        return Err(AppError::Unauthorized(format!(
            "{} does not work for business {}",
            actor.id, unit.business_id
        )));
    }

    let guest_count = req.guest_count.unwrap_or(1);
    if guest_count < 1 || guest_count > unit.capacity {
        return Err(AppError::Validation(format!(
            "guest_count must be between 1 and {}",
            unit.capacity
        )));
    }

    if !unit.is_bookable() {
        return Err(unit_unavailable(&unit));
    }

    if !state
        .capabilities
        .is_module_enabled(&unit.business_id, Module::Booking)?
    {
        return Err(AppError::ModuleDisabled(unit.business_id));
    }

    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        unit_id: unit.id.clone(),
        business_id: unit.business_id.clone(),
        guest_id,
        guest_count,
        check_in: req.check_in,
        check_out: req.check_out,
        total_price: req.total_price,
        status: if walk_in {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        },
        payment_verified: walk_in,
        created_by: if walk_in { CreatedBy::Staff } else { CreatedBy::Guest },
        cancellation_reason: None,
        refund_percent: None,
        version: 1,
        created_at: now,
        updated_at: now,
    };

    db::with_busy_retry(state.config.busy_retry_attempts, || {
        let mut conn = state.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        reserve_booking(&tx, &booking, actor)?;
        tx.commit()?;
        Ok(())
    })?;

    tracing::info!(
        booking_id = %booking.id,
        unit_id = %booking.unit_id,
        guest_id = %booking.guest_id,
        status = booking.status.as_str(),
        walk_in,
        "booking created"
    );

    events::emit(
        state,
        DomainEvent::BookingCreated {
            booking_id: booking.id.clone(),
            unit_id: booking.unit_id.clone(),
            business_id: booking.business_id.clone(),
            guest_id: booking.guest_id.clone(),
            walk_in,
        },
    );
    if walk_in {
        events::emit(
            state,
            DomainEvent::BookingConfirmed {
                booking_id: booking.id.clone(),
            },
        );
    }

    Ok(booking)
}

/// Inserts the booking, its ledger window and its first transition.
///
/// Runs inside the caller's transaction. The unit is read again here so a
/// status change committed since the pre-checks still blocks the booking.
fn reserve_booking(conn: &Connection, booking: &Booking, actor: &Actor) -> AppResult<()> {
    let unit = queries::get_unit(conn, &booking.unit_id)?
        .ok_or_else(|| AppError::NotFound(format!("unit {}", booking.unit_id)))?;
    if !unit.is_bookable() {
        return Err(unit_unavailable(&unit));
    }

    queries::insert_booking(conn, booking)?;
    match ledger::reserve(conn, &booking.unit_id, booking.check_in, booking.check_out, &booking.id) {
        Ok(_) => {}
        Err(ReserveError::Conflict { booking_id, start, end }) => {
            return Err(AppError::UnitUnavailable {
                unit_id: booking.unit_id.clone(),
                reason: format!("dates overlap booking {booking_id} ({start} to {end})"),
            });
        }
        Err(ReserveError::Database(e)) => return Err(e.into()),
    }
    queries::insert_transition(
        conn,
        &BookingTransition {
            booking_id: booking.id.clone(),
            from_status: None,
            to_status: booking.status,
            actor_id: actor.id.clone(),
            actor_role: actor.role.as_str().to_string(),
            reason: None,
            created_at: booking.created_at,
        },
    )?;
    Ok(())
}

fn unit_unavailable(unit: &Unit) -> AppError {
    AppError::UnitUnavailable {
        unit_id: unit.id.clone(),
        reason: format!(
            "unit is {}{}",
            unit.status.as_str(),
            if unit.available { "" } else { " and not available" }
        ),
    }
}

/// Guests may not book stays that already started; walk-ins may start today
/// regardless of the hour.
fn validate_dates(req: &NewBooking, now: chrono::NaiveDateTime, walk_in: bool, check_in_hour: u32) -> AppResult<()> {
    if req.check_in >= req.check_out {
        return Err(AppError::Validation(
            "check_in must be before check_out".to_string(),
        ));
    }

    let today = now.date();
    if req.check_in < today {
        return Err(AppError::Validation(format!(
            "check_in {} is in the past",
            req.check_in
        )));
    }

    if !walk_in {
        let starts_at = req
            .check_in
            .and_hms_opt(check_in_hour.min(23), 0, 0)
            .unwrap_or_else(|| req.check_in.and_time(chrono::NaiveTime::default()));
        if starts_at < now {
            return Err(AppError::Validation(
                "check-in time has already passed; ask staff for a walk-in".to_string(),
            ));
        }
    }

    Ok(())
}

pub fn get(state: &AppState, booking_id: &str) -> AppResult<Booking> {
    let db = state.conn()?;
    queries::get_booking_by_id(&db, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))
}

pub fn list_by_guest(state: &AppState, guest_id: &str) -> AppResult<Vec<Booking>> {
    let db = state.conn()?;
    Ok(queries::get_bookings_for_guest(&db, guest_id)?)
}

pub fn list_by_unit(state: &AppState, unit_id: &str) -> AppResult<Vec<Booking>> {
    let db = state.conn()?;
    Ok(queries::get_bookings_for_unit(&db, unit_id)?)
}

pub fn history(state: &AppState, booking_id: &str) -> AppResult<Vec<BookingTransition>> {
    let db = state.conn()?;
    Ok(queries::get_transitions(&db, booking_id)?)
}

/// Read access: the booking's guest, staff of its business, platform admins.
pub fn authorize_read(actor: &Actor, booking: &Booking) -> AppResult<()> {
    let allowed = match actor.role {
        Role::Guest => actor.id == booking.guest_id,
        Role::Staff | Role::Owner => actor.works_for(&booking.business_id),
        Role::PlatformAdmin => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "{} cannot view booking {}",
            actor.id, booking.id
        )))
    }
}
