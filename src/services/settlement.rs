use rusqlite::TransactionBehavior;
use sha1::{Digest, Sha1};

use crate::db::{self, queries};
use crate::errors::{AppError, AppResult};
use crate::models::{Actor, Booking, BookingStatus, DomainEvent, PaymentDecision, PaymentProof, Verification};
use crate::services::events;
use crate::services::lifecycle::{self, TransitionOptions};
use crate::state::AppState;

/// Stable reference for uploaded evidence bytes.
pub fn evidence_digest(bytes: &[u8]) -> String {
    let digest = Sha1::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("sha1:{hex}")
}

/// Records the guest's payment evidence. A proof still awaiting review is
/// superseded in place; after a rejection a fresh proof is created.
pub fn submit_proof(
    state: &AppState,
    booking_id: &str,
    evidence_ref: &str,
    actor: &Actor,
) -> AppResult<PaymentProof> {
    let evidence_ref = evidence_ref.trim();
    if evidence_ref.is_empty() {
        return Err(AppError::Validation("evidence reference is empty".to_string()));
    }
    if !actor.is_guest() {
        return Err(AppError::Unauthorized(
            "only the booking's guest submits payment proof".to_string(),
        ));
    }

    let (proof, superseded) = db::with_busy_retry(state.config.busy_retry_attempts, || {
        let now = state.clock.now();
        let mut conn = state.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let booking = queries::get_booking_by_id(&tx, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
        if booking.guest_id != actor.id {
            return Err(AppError::Unauthorized(format!(
                "{} does not own booking {booking_id}",
                actor.id
            )));
        }
        if booking.status != BookingStatus::Pending {
            return Err(AppError::InvalidTransition {
                current: booking.status,
                action: "submit payment for",
            });
        }

        let latest = queries::get_latest_proof(&tx, booking_id)?;
        let outcome = match latest {
            Some(mut proof) if proof.verification == Verification::Submitted => {
                queries::supersede_proof(&tx, &proof.id, evidence_ref, &now)?;
                proof.evidence_ref = evidence_ref.to_string();
                proof.submitted_at = now;
                (proof, true)
            }
            Some(proof) if proof.verification == Verification::Verified => {
                return Err(AppError::InvalidTransition {
                    current: booking.status,
                    action: "resubmit verified payment for",
                });
            }
            _ => {
                let proof = PaymentProof {
                    id: uuid::Uuid::new_v4().to_string(),
                    booking_id: booking_id.to_string(),
                    evidence_ref: evidence_ref.to_string(),
                    verification: Verification::Submitted,
                    submitted_at: now,
                    reviewed_at: None,
                    reviewed_by: None,
                };
                queries::insert_proof(&tx, &proof)?;
                (proof, false)
            }
        };

        tx.commit()?;
        Ok(outcome)
    })?;

    tracing::info!(booking_id, proof_id = %proof.id, superseded, "payment proof submitted");

    events::emit(
        state,
        DomainEvent::PaymentSubmitted {
            booking_id: booking_id.to_string(),
            proof_id: proof.id.clone(),
        },
    );

    Ok(proof)
}

/// Staff decision on the latest proof. Verification confirms the booking;
/// rejection leaves it pending for the guest to resubmit.
pub fn verify(
    state: &AppState,
    booking_id: &str,
    decision: PaymentDecision,
    actor: &Actor,
) -> AppResult<Booking> {
    if !actor.is_staff() {
        tracing::warn!(booking_id, actor = %actor.id, role = actor.role.as_str(), "payment verification refused");
        return Err(AppError::Unauthorized(
            "only staff can verify payments".to_string(),
        ));
    }

    let outcome = db::with_busy_retry(state.config.busy_retry_attempts, || {
        let now = state.clock.now();
        let mut conn = state.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let booking = queries::get_booking_by_id(&tx, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
        if !actor.works_for(&booking.business_id) {
            return Err(AppError::Unauthorized(format!(
                "{} does not work for business {}",
                actor.id, booking.business_id
            )));
        }

        let proof = queries::get_latest_proof(&tx, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("payment proof for booking {booking_id}")))?;

        // Rejecting twice changes nothing.
        if decision == PaymentDecision::Rejected && proof.verification == Verification::Rejected {
            return Ok((booking, proof, false));
        }

        if booking.status != BookingStatus::Pending || proof.verification == Verification::Verified {
            return Err(AppError::InvalidTransition {
                current: booking.status,
                action: "verify payment for",
            });
        }
        if proof.verification != Verification::Submitted {
            return Err(AppError::NotFound(format!(
                "submitted payment proof for booking {booking_id}"
            )));
        }

        queries::set_proof_verification(&tx, &proof.id, decision.into(), &actor.id, &now)?;

        let mut booking = booking;
        if decision == PaymentDecision::Verified {
            let mut paid = booking.clone();
            paid.payment_verified = true;
            paid.updated_at = now;
            if !queries::update_booking_state(&tx, &paid, booking.version)? {
                return Err(AppError::StaleState(booking_id.to_string()));
            }
            paid.version += 1;
            booking = paid;
        }

        tx.commit()?;
        Ok((booking, proof, true))
    })?;

    let (booking, proof, changed) = outcome;
    if !changed {
        tracing::debug!(booking_id, proof_id = %proof.id, "proof already rejected");
        return Ok(booking);
    }

    tracing::info!(
        booking_id,
        proof_id = %proof.id,
        decision = Verification::from(decision).as_str(),
        reviewer = %actor.id,
        "payment reviewed"
    );

    match decision {
        PaymentDecision::Rejected => {
            events::emit(
                state,
                DomainEvent::PaymentRejected {
                    booking_id: booking_id.to_string(),
                    proof_id: proof.id,
                },
            );
            Ok(booking)
        }
        PaymentDecision::Verified => {
            events::emit(
                state,
                DomainEvent::PaymentVerified {
                    booking_id: booking_id.to_string(),
                    proof_id: proof.id,
                },
            );
            lifecycle::confirm(state, booking_id, actor, TransitionOptions::default())
        }
    }
}

pub fn latest_proof(state: &AppState, booking_id: &str) -> AppResult<Option<PaymentProof>> {
    let db = state.conn()?;
    Ok(queries::get_latest_proof(&db, booking_id)?)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::services::registry::{self, tests::{harness, request}};

    fn pending(h: &registry::tests::Harness) -> Booking {
        registry::create(&h.state, request("U1", "2025-01-10", "2025-01-12"), &Actor::guest("G1")).unwrap()
    }

    fn staff() -> Actor {
        Actor::staff("S1", "B1")
    }

    #[test]
    fn test_evidence_digest() {
        assert_eq!(
            evidence_digest(b"abc"),
            "sha1:a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_verify_confirms_booking() {
        let h = harness();
        let booking = pending(&h);
        submit_proof(&h.state, &booking.id, "receipts/tx-881.jpg", &Actor::guest("G1")).unwrap();

        let confirmed = verify(&h.state, &booking.id, PaymentDecision::Verified, &staff()).unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert!(confirmed.payment_verified);

        let proof = latest_proof(&h.state, &booking.id).unwrap().unwrap();
        assert_eq!(proof.verification, Verification::Verified);
        assert_eq!(proof.reviewed_by.as_deref(), Some("S1"));
        assert_eq!(
            h.sink.kinds(),
            vec!["booking_created", "payment_submitted", "payment_verified", "booking_confirmed"]
        );
    }

    #[test]
    fn test_guest_cannot_verify() {
        let h = harness();
        let booking = pending(&h);
        submit_proof(&h.state, &booking.id, "receipts/tx-881.jpg", &Actor::guest("G1")).unwrap();

        let err = verify(&h.state, &booking.id, PaymentDecision::Verified, &Actor::guest("G1")).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        let err = verify(&h.state, &booking.id, PaymentDecision::Verified, &Actor::staff("S2", "B2")).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let stored = registry::get(&h.state, &booking.id).unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
        assert!(!stored.payment_verified);
    }

    #[test]
    fn test_resubmission_supersedes() {
        let h = harness();
        let booking = pending(&h);
        let guest = Actor::guest("G1");
        let first = submit_proof(&h.state, &booking.id, "receipts/blurry.jpg", &guest).unwrap();
        h.clock.advance(Duration::minutes(5));
        let second = submit_proof(&h.state, &booking.id, "receipts/clear.jpg", &guest).unwrap();

        assert_eq!(first.id, second.id);
        let count: i64 = h
            .state
            .conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM payment_proofs WHERE booking_id = ?1",
                rusqlite::params![booking.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            latest_proof(&h.state, &booking.id).unwrap().unwrap().evidence_ref,
            "receipts/clear.jpg"
        );
    }

    #[test]
    fn test_reject_then_resubmit() {
        let h = harness();
        let booking = pending(&h);
        let guest = Actor::guest("G1");
        let rejected_proof = submit_proof(&h.state, &booking.id, "receipts/wrong-amount.jpg", &guest).unwrap();

        let after_first = verify(&h.state, &booking.id, PaymentDecision::Rejected, &staff()).unwrap();
        let after_second = verify(&h.state, &booking.id, PaymentDecision::Rejected, &staff()).unwrap();
        for b in [&after_first, &after_second] {
            assert_eq!(b.status, BookingStatus::Pending);
            assert!(!b.payment_verified);
        }
        assert_eq!(h.sink.kinds().iter().filter(|k| **k == "payment_rejected").count(), 1);

        // a rejected proof cannot be verified after the fact
        let err = verify(&h.state, &booking.id, PaymentDecision::Verified, &staff()).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let fresh = submit_proof(&h.state, &booking.id, "receipts/right-amount.jpg", &guest).unwrap();
        assert_ne!(fresh.id, rejected_proof.id);
        let confirmed = verify(&h.state, &booking.id, PaymentDecision::Verified, &staff()).unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_submit_rules() {
        let h = harness();
        let booking = pending(&h);

        let err = submit_proof(&h.state, &booking.id, "  ", &Actor::guest("G1")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = submit_proof(&h.state, &booking.id, "r.jpg", &Actor::guest("G2")).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        let err = verify(&h.state, &booking.id, PaymentDecision::Verified, &staff()).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        submit_proof(&h.state, &booking.id, "r.jpg", &Actor::guest("G1")).unwrap();
        verify(&h.state, &booking.id, PaymentDecision::Verified, &staff()).unwrap();

        // confirmed bookings take no more evidence and no second verification
        let err = submit_proof(&h.state, &booking.id, "again.jpg", &Actor::guest("G1")).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        let err = verify(&h.state, &booking.id, PaymentDecision::Verified, &staff()).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }
}
