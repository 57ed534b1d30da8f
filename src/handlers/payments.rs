use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use base64::Engine;
use serde::Deserialize;

use super::authenticate;
use crate::errors::{AppError, AppResult};
use crate::models::{Booking, PaymentDecision, PaymentProof};
use crate::services::{registry, settlement};
use crate::state::AppState;

// POST /api/bookings/:id/payment-proof
#[derive(Deserialize)]
pub struct SubmitProofRequest {
    /// Reference to evidence stored elsewhere (file key, transfer id).
    pub evidence_ref: Option<String>,
    /// Raw evidence, base64 encoded. Stored as its digest.
    pub evidence: Option<String>,
}

pub async fn submit_proof(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<SubmitProofRequest>,
) -> AppResult<(StatusCode, Json<PaymentProof>)> {
    let actor = authenticate(&state, &headers)?;

    let evidence_ref = match (req.evidence_ref, req.evidence) {
        (Some(reference), None) => reference,
        (None, Some(encoded)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| AppError::Validation(format!("evidence is not valid base64: {e}")))?;
            if bytes.is_empty() {
                return Err(AppError::Validation("evidence is empty".to_string()));
            }
            settlement::evidence_digest(&bytes)
        }
        _ => {
            return Err(AppError::Validation(
                "send exactly one of evidence_ref or evidence".to_string(),
            ))
        }
    };

    let proof = settlement::submit_proof(&state, &id, &evidence_ref, &actor)?;
    Ok((StatusCode::CREATED, Json(proof)))
}

// GET /api/bookings/:id/payment-proof
pub async fn latest_proof(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<PaymentProof>> {
    let actor = authenticate(&state, &headers)?;
    let booking = registry::get(&state, &id)?;
    registry::authorize_read(&actor, &booking)?;

    settlement::latest_proof(&state, &id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("payment proof for booking {id}")))
}

// POST /api/bookings/:id/payment/verify
#[derive(Deserialize)]
pub struct VerifyRequest {
    pub decision: PaymentDecision,
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<VerifyRequest>,
) -> AppResult<Json<Booking>> {
    let actor = authenticate(&state, &headers)?;
    let booking = settlement::verify(&state, &id, req.decision, &actor)?;
    Ok(Json(booking))
}
