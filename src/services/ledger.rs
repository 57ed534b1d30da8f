use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::queries;

/// A reserved, half-open date range `[start, end)` on one unit, owned by one booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilityWindow {
    pub booking_id: String,
    pub unit_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, thiserror::Error)]
pub enum ReserveError {
    #[error("dates overlap booking {booking_id} ({start} to {end})")]
    Conflict {
        booking_id: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

/// `[a, b)` and `[c, d)` overlap iff `a < d && c < b`; back-to-back stays do not.
pub fn overlaps(a: NaiveDate, b: NaiveDate, c: NaiveDate, d: NaiveDate) -> bool {
    a < d && c < b
}

/// Checks the unit's live windows and inserts the new one if nothing collides.
///
/// The caller must hold the connection for the whole call (inside an
/// immediate transaction) so the check and insert are observed together.
pub fn reserve(
    conn: &Connection,
    unit_id: &str,
    start: NaiveDate,
    end: NaiveDate,
    booking_id: &str,
) -> Result<AvailabilityWindow, ReserveError> {
    if let Some(existing) = queries::find_overlapping_window(conn, unit_id, &start, &end)? {
        return Err(ReserveError::Conflict {
            booking_id: existing.booking_id,
            start: existing.start,
            end: existing.end,
        });
    }

    let window = AvailabilityWindow {
        booking_id: booking_id.to_string(),
        unit_id: unit_id.to_string(),
        start,
        end,
    };
    queries::insert_window(conn, &window)?;

    tracing::debug!(unit_id, booking_id, %start, %end, "reserved window");
    Ok(window)
}

/// Drops the window held by `booking_id`. Releasing twice is a no-op.
pub fn release(conn: &Connection, booking_id: &str) -> rusqlite::Result<()> {
    if queries::delete_window(conn, booking_id)? {
        tracing::debug!(booking_id, "released window");
    }
    Ok(())
}

pub fn is_range_free(
    conn: &Connection,
    unit_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> rusqlite::Result<bool> {
    Ok(queries::find_overlapping_window(conn, unit_id, &start, &end)?.is_none())
}

pub fn unit_calendar(conn: &Connection, unit_id: &str) -> rusqlite::Result<Vec<AvailabilityWindow>> {
    queries::get_windows_for_unit(conn, unit_id)
}
