pub mod cancellation;
pub mod capability;
pub mod clock;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod registry;
pub mod reputation;
pub mod settlement;
pub mod units;
