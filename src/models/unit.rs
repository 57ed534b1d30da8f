use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub capacity: i32,
    pub nightly_price: i64,
    pub status: UnitStatus,
    pub available: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Unit {
    /// READY and flagged available is the only combination that accepts new reservations.
    pub fn is_bookable(&self) -> bool {
        self.status == UnitStatus::Ready && self.available
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Ready,
    Blocked,
    Maintenance,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Ready => "ready",
            UnitStatus::Blocked => "blocked",
            UnitStatus::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(UnitStatus::Ready),
            "blocked" => Some(UnitStatus::Blocked),
            "maintenance" => Some(UnitStatus::Maintenance),
            _ => None,
        }
    }
}
