use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{fmt_date, fmt_ts, DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::models::{
    Booking, BookingStatus, BookingTransition, CreatedBy, EventEnvelope, PaymentProof, RatingSummary,
    Review, Unit, UnitStatus, Verification,
};
use crate::services::cancellation::CancellationPolicy;
use crate::services::ledger::AvailabilityWindow;

// ── Column helpers ──

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn enum_col<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown value: {raw}")))
}

fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
        .map_err(|e| conversion_error(idx, format!("bad timestamp {raw}: {e}")))
}

fn opt_ts_col(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT)
            .map_err(|e| conversion_error(idx, format!("bad timestamp {s}: {e}")))
    })
    .transpose()
}

fn date_col(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| conversion_error(idx, format!("bad date {raw}: {e}")))
}

// ── Units ──

const UNIT_COLUMNS: &str =
    "id, business_id, name, capacity, nightly_price, status, available, created_at, updated_at";

fn parse_unit_row(row: &Row) -> rusqlite::Result<Unit> {
    Ok(Unit {
        id: row.get(0)?,
        business_id: row.get(1)?,
        name: row.get(2)?,
        capacity: row.get(3)?,
        nightly_price: row.get(4)?,
        status: enum_col(row, 5, UnitStatus::parse)?,
        available: row.get::<_, i32>(6)? != 0,
        created_at: ts_col(row, 7)?,
        updated_at: ts_col(row, 8)?,
    })
}

pub fn upsert_unit(conn: &Connection, unit: &Unit) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO units (id, business_id, name, capacity, nightly_price, status, available, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           capacity = excluded.capacity,
           nightly_price = excluded.nightly_price,
           status = excluded.status,
           available = excluded.available,
           updated_at = excluded.updated_at",
        params![
            unit.id,
            unit.business_id,
            unit.name,
            unit.capacity,
            unit.nightly_price,
            unit.status.as_str(),
            unit.available as i32,
            fmt_ts(&unit.created_at),
            fmt_ts(&unit.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_unit(conn: &Connection, id: &str) -> rusqlite::Result<Option<Unit>> {
    conn.query_row(
        &format!("SELECT {UNIT_COLUMNS} FROM units WHERE id = ?1"),
        params![id],
        parse_unit_row,
    )
    .optional()
}

pub fn set_unit_status(
    conn: &Connection,
    id: &str,
    status: UnitStatus,
    available: bool,
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE units SET status = ?1, available = ?2, updated_at = ?3 WHERE id = ?4",
        params![status.as_str(), available as i32, fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, unit_id, business_id, guest_id, guest_count, check_in, check_out, total_price, status, \
     payment_verified, created_by, cancellation_reason, refund_percent, version, created_at, updated_at";

fn parse_booking_row(row: &Row) -> rusqlite::Result<Booking> {
    Ok(Booking {
        id: row.get(0)?,
        unit_id: row.get(1)?,
        business_id: row.get(2)?,
        guest_id: row.get(3)?,
        guest_count: row.get(4)?,
        check_in: date_col(row, 5)?,
        check_out: date_col(row, 6)?,
        total_price: row.get(7)?,
        status: enum_col(row, 8, BookingStatus::parse)?,
        payment_verified: row.get::<_, i32>(9)? != 0,
        created_by: enum_col(row, 10, CreatedBy::parse)?,
        cancellation_reason: row.get(11)?,
        refund_percent: row.get(12)?,
        version: row.get(13)?,
        created_at: ts_col(row, 14)?,
        updated_at: ts_col(row, 15)?,
    })
}

pub fn insert_booking(conn: &Connection, booking: &Booking) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, unit_id, business_id, guest_id, guest_count, check_in, check_out, total_price, status,
                               payment_verified, created_by, cancellation_reason, refund_percent, version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            booking.id,
            booking.unit_id,
            booking.business_id,
            booking.guest_id,
            booking.guest_count,
            fmt_date(&booking.check_in),
            fmt_date(&booking.check_out),
            booking.total_price,
            booking.status.as_str(),
            booking.payment_verified as i32,
            booking.created_by.as_str(),
            booking.cancellation_reason,
            booking.refund_percent,
            booking.version,
            fmt_ts(&booking.created_at),
            fmt_ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        parse_booking_row,
    )
    .optional()
}

pub fn get_bookings_for_guest(conn: &Connection, guest_id: &str) -> rusqlite::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE guest_id = ?1 ORDER BY check_in ASC, created_at ASC"
    ))?;
    let rows = stmt.query_map(params![guest_id], parse_booking_row)?;
    rows.collect()
}

pub fn get_bookings_for_unit(conn: &Connection, unit_id: &str) -> rusqlite::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE unit_id = ?1 ORDER BY check_in ASC, created_at ASC"
    ))?;
    let rows = stmt.query_map(params![unit_id], parse_booking_row)?;
    rows.collect()
}

/// Compare-and-swap write of the mutable booking fields. Returns false when
/// the stored version no longer matches `expected_version`.
pub fn update_booking_state(
    conn: &Connection,
    booking: &Booking,
    expected_version: i64,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET
           status = ?1,
           payment_verified = ?2,
           cancellation_reason = ?3,
           refund_percent = ?4,
           updated_at = ?5,
           version = version + 1
         WHERE id = ?6 AND version = ?7",
        params![
            booking.status.as_str(),
            booking.payment_verified as i32,
            booking.cancellation_reason,
            booking.refund_percent,
            fmt_ts(&booking.updated_at),
            booking.id,
            expected_version,
        ],
    )?;
    Ok(count == 1)
}

// ── Transition history ──

pub fn insert_transition(conn: &Connection, transition: &BookingTransition) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO booking_transitions (booking_id, from_status, to_status, actor_id, actor_role, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            transition.booking_id,
            transition.from_status.map(|s| s.as_str()),
            transition.to_status.as_str(),
            transition.actor_id,
            transition.actor_role,
            transition.reason,
            fmt_ts(&transition.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_transitions(conn: &Connection, booking_id: &str) -> rusqlite::Result<Vec<BookingTransition>> {
    let mut stmt = conn.prepare(
        "SELECT booking_id, from_status, to_status, actor_id, actor_role, reason, created_at
         FROM booking_transitions WHERE booking_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![booking_id], |row| {
        let from_raw: Option<String> = row.get(1)?;
        let from_status = match from_raw {
            Some(raw) => Some(
                BookingStatus::parse(&raw)
                    .ok_or_else(|| conversion_error(1, format!("unknown value: {raw}")))?,
            ),
            None => None,
        };
        Ok(BookingTransition {
            booking_id: row.get(0)?,
            from_status,
            to_status: enum_col(row, 2, BookingStatus::parse)?,
            actor_id: row.get(3)?,
            actor_role: row.get(4)?,
            reason: row.get(5)?,
            created_at: ts_col(row, 6)?,
        })
    })?;
    rows.collect()
}

// ── Availability windows ──

fn parse_window_row(row: &Row) -> rusqlite::Result<AvailabilityWindow> {
    Ok(AvailabilityWindow {
        booking_id: row.get(0)?,
        unit_id: row.get(1)?,
        start: date_col(row, 2)?,
        end: date_col(row, 3)?,
    })
}

/// First live window on `unit_id` intersecting the half-open range `[start, end)`.
pub fn find_overlapping_window(
    conn: &Connection,
    unit_id: &str,
    start: &NaiveDate,
    end: &NaiveDate,
) -> rusqlite::Result<Option<AvailabilityWindow>> {
    conn.query_row(
        "SELECT booking_id, unit_id, start_date, end_date FROM availability_windows
         WHERE unit_id = ?1 AND start_date < ?3 AND ?2 < end_date
         ORDER BY start_date ASC LIMIT 1",
        params![unit_id, fmt_date(start), fmt_date(end)],
        parse_window_row,
    )
    .optional()
}

pub fn insert_window(conn: &Connection, window: &AvailabilityWindow) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO availability_windows (booking_id, unit_id, start_date, end_date) VALUES (?1, ?2, ?3, ?4)",
        params![
            window.booking_id,
            window.unit_id,
            fmt_date(&window.start),
            fmt_date(&window.end),
        ],
    )?;
    Ok(())
}

pub fn delete_window(conn: &Connection, booking_id: &str) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "DELETE FROM availability_windows WHERE booking_id = ?1",
        params![booking_id],
    )?;
    Ok(count > 0)
}

pub fn get_windows_for_unit(conn: &Connection, unit_id: &str) -> rusqlite::Result<Vec<AvailabilityWindow>> {
    let mut stmt = conn.prepare(
        "SELECT booking_id, unit_id, start_date, end_date FROM availability_windows
         WHERE unit_id = ?1 ORDER BY start_date ASC",
    )?;
    let rows = stmt.query_map(params![unit_id], parse_window_row)?;
    rows.collect()
}

// ── Payment proofs ──

const PROOF_COLUMNS: &str =
    "id, booking_id, evidence_ref, verification, submitted_at, reviewed_at, reviewed_by";

fn parse_proof_row(row: &Row) -> rusqlite::Result<PaymentProof> {
    Ok(PaymentProof {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        evidence_ref: row.get(2)?,
        verification: enum_col(row, 3, Verification::parse)?,
        submitted_at: ts_col(row, 4)?,
        reviewed_at: opt_ts_col(row, 5)?,
        reviewed_by: row.get(6)?,
    })
}

pub fn insert_proof(conn: &Connection, proof: &PaymentProof) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO payment_proofs (id, booking_id, evidence_ref, verification, submitted_at, reviewed_at, reviewed_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            proof.id,
            proof.booking_id,
            proof.evidence_ref,
            proof.verification.as_str(),
            fmt_ts(&proof.submitted_at),
            proof.reviewed_at.as_ref().map(fmt_ts),
            proof.reviewed_by,
        ],
    )?;
    Ok(())
}

/// Most recent proof for a booking, whatever its verification state.
pub fn get_latest_proof(conn: &Connection, booking_id: &str) -> rusqlite::Result<Option<PaymentProof>> {
    conn.query_row(
        &format!(
            "SELECT {PROOF_COLUMNS} FROM payment_proofs WHERE booking_id = ?1
             ORDER BY submitted_at DESC, rowid DESC LIMIT 1"
        ),
        params![booking_id],
        parse_proof_row,
    )
    .optional()
}

/// Replaces the evidence of a still-submitted proof in place.
pub fn supersede_proof(
    conn: &Connection,
    proof_id: &str,
    evidence_ref: &str,
    submitted_at: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE payment_proofs SET evidence_ref = ?1, submitted_at = ?2
         WHERE id = ?3 AND verification = 'submitted'",
        params![evidence_ref, fmt_ts(submitted_at), proof_id],
    )?;
    Ok(count > 0)
}

pub fn set_proof_verification(
    conn: &Connection,
    proof_id: &str,
    verification: Verification,
    reviewed_by: &str,
    reviewed_at: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE payment_proofs SET verification = ?1, reviewed_by = ?2, reviewed_at = ?3
         WHERE id = ?4 AND verification = 'submitted'",
        params![verification.as_str(), reviewed_by, fmt_ts(reviewed_at), proof_id],
    )?;
    Ok(count > 0)
}

// ── Reviews ──

const REVIEW_COLUMNS: &str =
    "id, booking_id, guest_id, business_id, rating, comment, created_at, updated_at";

fn parse_review_row(row: &Row) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        guest_id: row.get(2)?,
        business_id: row.get(3)?,
        rating: row.get(4)?,
        comment: row.get(5)?,
        created_at: ts_col(row, 6)?,
        updated_at: ts_col(row, 7)?,
    })
}

pub fn insert_review(conn: &Connection, review: &Review) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO reviews (id, booking_id, guest_id, business_id, rating, comment, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            review.id,
            review.booking_id,
            review.guest_id,
            review.business_id,
            review.rating,
            review.comment,
            fmt_ts(&review.created_at),
            fmt_ts(&review.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_review(conn: &Connection, id: &str) -> rusqlite::Result<Option<Review>> {
    conn.query_row(
        &format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = ?1"),
        params![id],
        parse_review_row,
    )
    .optional()
}

pub fn get_review_for_booking(conn: &Connection, booking_id: &str) -> rusqlite::Result<Option<Review>> {
    conn.query_row(
        &format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE booking_id = ?1"),
        params![booking_id],
        parse_review_row,
    )
    .optional()
}

pub fn update_review(conn: &Connection, review: &Review) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE reviews SET rating = ?1, comment = ?2, updated_at = ?3 WHERE id = ?4",
        params![review.rating, review.comment, fmt_ts(&review.updated_at), review.id],
    )?;
    Ok(count > 0)
}

pub fn get_reviews_for_business(conn: &Connection, business_id: &str) -> rusqlite::Result<Vec<Review>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REVIEW_COLUMNS} FROM reviews WHERE business_id = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map(params![business_id], parse_review_row)?;
    rows.collect()
}

pub fn get_rating_summary(conn: &Connection, business_id: &str) -> rusqlite::Result<RatingSummary> {
    conn.query_row(
        "SELECT COUNT(*), AVG(rating) FROM reviews WHERE business_id = ?1",
        params![business_id],
        |row| {
            Ok(RatingSummary {
                business_id: business_id.to_string(),
                review_count: row.get(0)?,
                average_rating: row.get(1)?,
            })
        },
    )
}

// ── Business settings ──

pub fn get_module_flag(conn: &Connection, business_id: &str, module: &str) -> rusqlite::Result<Option<bool>> {
    conn.query_row(
        "SELECT enabled FROM business_modules WHERE business_id = ?1 AND module = ?2",
        params![business_id, module],
        |row| Ok(row.get::<_, i32>(0)? != 0),
    )
    .optional()
}

pub fn set_module_flag(conn: &Connection, business_id: &str, module: &str, enabled: bool) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO business_modules (business_id, module, enabled) VALUES (?1, ?2, ?3)
         ON CONFLICT(business_id, module) DO UPDATE SET enabled = excluded.enabled, updated_at = datetime('now')",
        params![business_id, module, enabled as i32],
    )?;
    Ok(())
}

pub fn get_policy_override(conn: &Connection, business_id: &str) -> rusqlite::Result<Option<(i64, u8, u8)>> {
    conn.query_row(
        "SELECT full_refund_hours, partial_refund_percent, no_show_refund_percent
         FROM business_policies WHERE business_id = ?1",
        params![business_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()
}

pub fn save_policy_override(
    conn: &Connection,
    business_id: &str,
    policy: &CancellationPolicy,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO business_policies (business_id, full_refund_hours, partial_refund_percent, no_show_refund_percent)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(business_id) DO UPDATE SET
           full_refund_hours = excluded.full_refund_hours,
           partial_refund_percent = excluded.partial_refund_percent,
           no_show_refund_percent = excluded.no_show_refund_percent",
        params![
            business_id,
            policy.full_refund_hours,
            policy.partial_refund_percent,
            policy.no_show_refund_percent,
        ],
    )?;
    Ok(())
}

// ── Event log ──

pub fn insert_event(conn: &Connection, envelope: &EventEnvelope) -> anyhow::Result<i64> {
    let payload = serde_json::to_string(&envelope.event)?;
    conn.execute(
        "INSERT INTO event_log (event_id, kind, booking_id, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            envelope.id,
            envelope.event.kind(),
            envelope.event.booking_id(),
            payload,
            fmt_ts(&envelope.occurred_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_events_since(conn: &Connection, since_seq: i64, limit: i64) -> anyhow::Result<Vec<EventEnvelope>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, payload, created_at FROM event_log WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![since_seq, limit], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            ts_col(row, 3)?,
        ))
    })?;

    let mut events = vec![];
    for row in rows {
        let (seq, id, payload, occurred_at) = row?;
        events.push(EventEnvelope {
            seq,
            id,
            occurred_at,
            event: serde_json::from_str(&payload)?,
        });
    }
    Ok(events)
}
