use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProof {
    pub id: String,
    pub booking_id: String,
    pub evidence_ref: String,
    pub verification: Verification,
    pub submitted_at: NaiveDateTime,
    pub reviewed_at: Option<NaiveDateTime>,
    pub reviewed_by: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Submitted,
    Verified,
    Rejected,
}

impl Verification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verification::Submitted => "submitted",
            Verification::Verified => "verified",
            Verification::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Verification::Submitted),
            "verified" => Some(Verification::Verified),
            "rejected" => Some(Verification::Rejected),
            _ => None,
        }
    }
}

/// Outcome a staff member records against a submitted proof.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDecision {
    Verified,
    Rejected,
}

impl From<PaymentDecision> for Verification {
    fn from(decision: PaymentDecision) -> Self {
        match decision {
            PaymentDecision::Verified => Verification::Verified,
            PaymentDecision::Rejected => Verification::Rejected,
        }
    }
}
