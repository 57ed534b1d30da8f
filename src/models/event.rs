use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Facts the core publishes after a state change has been committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    BookingCreated {
        booking_id: String,
        unit_id: String,
        business_id: String,
        guest_id: String,
        walk_in: bool,
    },
    PaymentSubmitted {
        booking_id: String,
        proof_id: String,
    },
    PaymentVerified {
        booking_id: String,
        proof_id: String,
    },
    PaymentRejected {
        booking_id: String,
        proof_id: String,
    },
    BookingConfirmed {
        booking_id: String,
    },
    CheckedIn {
        booking_id: String,
    },
    Completed {
        booking_id: String,
    },
    Cancelled {
        booking_id: String,
        refund_percent: u8,
        refund_amount: i64,
    },
    ReviewCreated {
        review_id: String,
        booking_id: String,
        rating: u8,
    },
    ReviewEdited {
        review_id: String,
        rating: u8,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::BookingCreated { .. } => "booking_created",
            DomainEvent::PaymentSubmitted { .. } => "payment_submitted",
            DomainEvent::PaymentVerified { .. } => "payment_verified",
            DomainEvent::PaymentRejected { .. } => "payment_rejected",
            DomainEvent::BookingConfirmed { .. } => "booking_confirmed",
            DomainEvent::CheckedIn { .. } => "checked_in",
            DomainEvent::Completed { .. } => "completed",
            DomainEvent::Cancelled { .. } => "cancelled",
            DomainEvent::ReviewCreated { .. } => "review_created",
            DomainEvent::ReviewEdited { .. } => "review_edited",
        }
    }

    pub fn booking_id(&self) -> Option<&str> {
        match self {
            DomainEvent::BookingCreated { booking_id, .. }
            | DomainEvent::PaymentSubmitted { booking_id, .. }
            | DomainEvent::PaymentVerified { booking_id, .. }
            | DomainEvent::PaymentRejected { booking_id, .. }
            | DomainEvent::BookingConfirmed { booking_id }
            | DomainEvent::CheckedIn { booking_id }
            | DomainEvent::Completed { booking_id }
            | DomainEvent::Cancelled { booking_id, .. }
            | DomainEvent::ReviewCreated { booking_id, .. } => Some(booking_id),
            DomainEvent::ReviewEdited { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Position in the local event log; 0 when the log write failed.
    pub seq: i64,
    pub id: String,
    pub occurred_at: NaiveDateTime,
    pub event: DomainEvent,
}
