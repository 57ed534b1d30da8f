use chrono::{Duration, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::models::{Booking, BookingStatus};

/// Longest full-refund threshold honoured, ten years.
pub const MAX_FULL_REFUND_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancellationPolicy {
    /// At or beyond this many hours before check-in the refund is full.
    pub full_refund_hours: i64,
    /// Refund between check-in time and the full-refund threshold.
    pub partial_refund_percent: u8,
    /// Refund once check-in time has passed without a check-in.
    pub no_show_refund_percent: u8,
    /// Hour of the check-in date at which the stay starts.
    pub check_in_hour: u32,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            full_refund_hours: 48,
            partial_refund_percent: 50,
            no_show_refund_percent: 0,
            check_in_hour: 14,
        }
    }
}

impl CancellationPolicy {
    pub fn check_in_instant(&self, booking: &Booking) -> NaiveDateTime {
        let time = NaiveTime::from_hms_opt(self.check_in_hour.min(23), 0, 0).unwrap_or_default();
        booking.check_in.and_time(time)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CancellationQuote {
    pub allowed: bool,
    pub refund_percent: u8,
    pub refund_amount: i64,
    pub hours_until_check_in: i64,
}

/// Pure refund evaluation; identical inputs always give identical output.
pub fn evaluate(booking: &Booking, now: NaiveDateTime, policy: &CancellationPolicy) -> CancellationQuote {
    let until = policy.check_in_instant(booking) - now;
    let hours_until_check_in = until.num_hours();

    let allowed = !matches!(
        booking.status,
        BookingStatus::CheckedIn | BookingStatus::Completed | BookingStatus::Cancelled
    );
    if !allowed {
        return CancellationQuote {
            allowed,
            refund_percent: 0,
            refund_amount: 0,
            hours_until_check_in,
        };
    }

    let threshold = Duration::hours(policy.full_refund_hours.clamp(0, MAX_FULL_REFUND_HOURS));
    let refund_percent = if until >= threshold {
        100
    } else if until >= Duration::zero() {
        policy.partial_refund_percent
    } else {
        policy.no_show_refund_percent
    }
    .min(100);

    // Nothing was collected on an unverified booking.
    let refund_amount = if booking.payment_verified {
        refund_of(booking.total_price, refund_percent)
    } else {
        0
    };

    CancellationQuote {
        allowed,
        refund_percent,
        refund_amount,
        hours_until_check_in,
    }
}

/// `price * percent / 100` without intermediate overflow; never exceeds `price`.
pub fn refund_of(price: i64, percent: u8) -> i64 {
    let amount = i128::from(price.max(0)) * i128::from(percent.min(100)) / 100;
    i64::try_from(amount).unwrap_or(i64::MAX)
}

/// The business's own policy if it has one, the configured defaults otherwise.
pub fn policy_for_business(
    conn: &Connection,
    business_id: &str,
    defaults: &CancellationPolicy,
) -> rusqlite::Result<CancellationPolicy> {
    Ok(match queries::get_policy_override(conn, business_id)? {
        Some((full_refund_hours, partial_refund_percent, no_show_refund_percent)) => CancellationPolicy {
            full_refund_hours: full_refund_hours.clamp(0, MAX_FULL_REFUND_HOURS),
            partial_refund_percent: partial_refund_percent.min(100),
            no_show_refund_percent: no_show_refund_percent.min(100),
            check_in_hour: defaults.check_in_hour,
        },
        None => *defaults,
    })
}
