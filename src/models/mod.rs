pub mod actor;
pub mod booking;
pub mod event;
pub mod payment;
pub mod review;
pub mod unit;

pub use actor::{Actor, Role};
pub use booking::{Booking, BookingStatus, BookingTransition, CreatedBy};
pub use event::{DomainEvent, EventEnvelope};
pub use payment::{PaymentDecision, PaymentProof, Verification};
pub use review::{RatingSummary, Review};
pub use unit::{Unit, UnitStatus};
