use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub booking_id: String,
    pub guest_id: String,
    pub business_id: String,
    pub rating: u8,
    pub comment: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct RatingSummary {
    pub business_id: String,
    pub review_count: i64,
    pub average_rating: Option<f64>,
}
