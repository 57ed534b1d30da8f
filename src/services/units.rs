use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::models::{Actor, Unit, UnitStatus};
use crate::services::ledger::{self, AvailabilityWindow};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct UnitInput {
    pub id: Option<String>,
    pub business_id: String,
    pub name: String,
    pub capacity: i32,
    pub nightly_price: i64,
    pub status: Option<UnitStatus>,
    pub available: Option<bool>,
}

fn require_staff_of(actor: &Actor, business_id: &str) -> AppResult<()> {
    if actor.works_for(business_id) {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "{} cannot manage units of business {business_id}",
            actor.id
        )))
    }
}

pub fn upsert_unit(state: &AppState, input: UnitInput, actor: &Actor) -> AppResult<Unit> {
    require_staff_of(actor, &input.business_id)?;
    if input.capacity < 1 {
        return Err(AppError::Validation("capacity must be at least 1".to_string()));
    }
    if input.nightly_price < 0 {
        return Err(AppError::Validation("nightly_price cannot be negative".to_string()));
    }
    if input.name.trim().is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }

    let now = state.clock.now();
    let db = state.conn()?;

    let existing = match &input.id {
        Some(id) => queries::get_unit(&db, id)?,
        None => None,
    };
    if let Some(existing) = &existing {
        // a unit never moves between businesses
        require_staff_of(actor, &existing.business_id)?;
    }

    let unit = Unit {
        id: input.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        business_id: input.business_id,
        name: input.name.trim().to_string(),
        capacity: input.capacity,
        nightly_price: input.nightly_price,
        status: input
            .status
            .or(existing.as_ref().map(|u| u.status))
            .unwrap_or(UnitStatus::Ready),
        available: input
            .available
            .or(existing.as_ref().map(|u| u.available))
            .unwrap_or(true),
        created_at: existing.as_ref().map(|u| u.created_at).unwrap_or(now),
        updated_at: now,
    };
    queries::upsert_unit(&db, &unit)?;

    tracing::info!(unit_id = %unit.id, business_id = %unit.business_id, status = unit.status.as_str(), "unit saved");
    Ok(unit)
}

pub fn get_unit(state: &AppState, unit_id: &str) -> AppResult<Unit> {
    let db = state.conn()?;
    queries::get_unit(&db, unit_id)?.ok_or_else(|| AppError::NotFound(format!("unit {unit_id}")))
}

/// Gates new reservations only; bookings already holding windows keep them.
pub fn set_unit_status(
    state: &AppState,
    unit_id: &str,
    status: UnitStatus,
    available: bool,
    actor: &Actor,
) -> AppResult<Unit> {
    let unit = get_unit(state, unit_id)?;
    require_staff_of(actor, &unit.business_id)?;

    let now = state.clock.now();
    {
        let db = state.conn()?;
        queries::set_unit_status(&db, unit_id, status, available, &now)?;
    }

    tracing::info!(unit_id, status = status.as_str(), available, "unit status changed");
    Ok(Unit {
        status,
        available,
        updated_at: now,
        ..unit
    })
}

pub fn calendar(state: &AppState, unit_id: &str) -> AppResult<Vec<AvailabilityWindow>> {
    get_unit(state, unit_id)?;
    let db = state.conn()?;
    Ok(ledger::unit_calendar(&db, unit_id)?)
}

pub fn is_range_free(state: &AppState, unit_id: &str, start: NaiveDate, end: NaiveDate) -> AppResult<bool> {
    if start >= end {
        return Err(AppError::Validation("start must be before end".to_string()));
    }
    get_unit(state, unit_id)?;
    let db = state.conn()?;
    Ok(ledger::is_range_free(&db, unit_id, start, end)?)
}
