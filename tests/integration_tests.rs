use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, NaiveDateTime};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;

use staybook::config::AppConfig;
use staybook::db;
use staybook::handlers;
use staybook::models::{Actor, BookingStatus};
use staybook::services::capability::{set_module_enabled, Module, SqliteCapabilities};
use staybook::services::clock::FixedClock;
use staybook::services::events::MemorySink;
use staybook::services::registry::{self, NewBooking};
use staybook::state::AppState;

const TOKEN: &str = "test-token";

// ── Helpers ──

struct TestApp {
    state: Arc<AppState>,
    clock: Arc<FixedClock>,
    sink: Arc<MemorySink>,
}

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

fn test_config() -> AppConfig {
    AppConfig {
        api_token: TOKEN.to_string(),
        ..AppConfig::default()
    }
}

fn test_app() -> TestApp {
    let db = Arc::new(Mutex::new(db::init_db(":memory:").unwrap()));
    let clock = Arc::new(FixedClock::new(ts("2025-01-01 09:00")));
    let sink = Arc::new(MemorySink::default());
    let (events_tx, _) = broadcast::channel(64);
    let state = Arc::new(AppState {
        db: Arc::clone(&db),
        config: test_config(),
        clock: clock.clone(),
        capabilities: Box::new(SqliteCapabilities::new(db, true)),
        event_sink: Box::new(Arc::clone(&sink)),
        events_tx,
    });
    TestApp { state, clock, sink }
}

fn guest(id: &str) -> Actor {
    Actor::guest(id)
}

fn staff() -> Actor {
    Actor::staff("S1", "B1")
}

async fn call(
    state: &Arc<AppState>,
    method: &str,
    uri: &str,
    actor: Option<&Actor>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {TOKEN}"));
    if let Some(actor) = actor {
        req = req
            .header(handlers::ACTOR_ID_HEADER, actor.id.as_str())
            .header(handlers::ACTOR_ROLE_HEADER, actor.role.as_str());
        if let Some(business) = &actor.business_id {
            req = req.header(handlers::ACTOR_BUSINESS_HEADER, business.as_str());
        }
    }
    let req = match body {
        Some(body) => req
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let res = handlers::router(state.clone()).oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn seed_unit(app: &TestApp) {
    let (status, _) = call(
        &app.state,
        "POST",
        "/api/units",
        Some(&Actor::owner("O1", "B1")),
        Some(json!({
            "id": "U1",
            "business_id": "B1",
            "name": "Garden Villa",
            "capacity": 4,
            "nightly_price": 250000
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

async fn book(app: &TestApp, who: &Actor, check_in: &str, check_out: &str) -> (StatusCode, Value) {
    call(
        &app.state,
        "POST",
        "/api/bookings",
        Some(who),
        Some(json!({
            "unit_id": "U1",
            "check_in": check_in,
            "check_out": check_out,
            "total_price": 500000
        })),
    )
    .await
}

/// Guest books 2025-01-10 → 2025-01-12, pays, staff verifies.
async fn confirmed_booking(app: &TestApp) -> String {
    let (status, booking) = book(app, &guest("G1"), "2025-01-10", "2025-01-12").await;
    assert_eq!(status, StatusCode::CREATED);
    let id = booking["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app.state,
        "POST",
        &format!("/api/bookings/{id}/payment-proof"),
        Some(&guest("G1")),
        Some(json!({"evidence_ref": "receipts/bca-0110.jpg"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, confirmed) = call(
        &app.state,
        "POST",
        &format!("/api/bookings/{id}/payment/verify"),
        Some(&staff()),
        Some(json!({"decision": "verified"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "confirmed");
    id
}

// ── Auth ──

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let res = handlers::router(app.state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_api_requires_token() {
    let app = test_app();
    let res = handlers::router(app.state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/units/U1")
                .header("Authorization", "Bearer wrong-token")
                .header(handlers::ACTOR_ID_HEADER, "G1")
                .header(handlers::ACTOR_ROLE_HEADER, "guest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // token alone is not enough, the actor must be named
    let (status, body) = call(&app.state, "GET", "/api/units/U1", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn test_event_stream_requires_token() {
    let app = test_app();
    let res = handlers::router(app.state)
        .oneshot(
            Request::builder()
                .uri("/api/events/stream?token=nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

// ── Scenarios ──

#[tokio::test]
async fn test_create_then_overlapping_conflict() {
    let app = test_app();
    seed_unit(&app).await;

    let (status, booking) = book(&app, &guest("G1"), "2025-01-10", "2025-01-12").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["payment_verified"], false);

    let (_, calendar) = call(&app.state, "GET", "/api/units/U1/calendar", Some(&staff()), None).await;
    assert_eq!(calendar.as_array().unwrap().len(), 1);
    assert_eq!(calendar[0]["booking_id"], booking["id"]);

    let (status, err) = book(&app, &guest("G2"), "2025-01-11", "2025-01-13").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "unit_unavailable");

    // back-to-back is fine
    let (status, _) = book(&app, &guest("G2"), "2025-01-12", "2025-01-14").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_verify_confirms_and_guest_cannot_verify() {
    let app = test_app();
    seed_unit(&app).await;

    let (_, booking) = book(&app, &guest("G1"), "2025-01-10", "2025-01-12").await;
    let id = booking["id"].as_str().unwrap();

    let (status, proof) = call(
        &app.state,
        "POST",
        &format!("/api/bookings/{id}/payment-proof"),
        Some(&guest("G1")),
        Some(json!({"evidence": "dHJhbnNmZXIgcmVjZWlwdA=="})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(proof["evidence_ref"].as_str().unwrap().starts_with("sha1:"));
    assert_eq!(proof["verification"], "submitted");

    let (status, err) = call(
        &app.state,
        "POST",
        &format!("/api/bookings/{id}/payment/verify"),
        Some(&guest("G1")),
        Some(json!({"decision": "verified"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["code"], "unauthorized");

    let (_, unchanged) = call(&app.state, "GET", &format!("/api/bookings/{id}"), Some(&guest("G1")), None).await;
    assert_eq!(unchanged["status"], "pending");

    let (status, confirmed) = call(
        &app.state,
        "POST",
        &format!("/api/bookings/{id}/payment/verify"),
        Some(&staff()),
        Some(json!({"decision": "verified"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "confirmed");
    assert_eq!(confirmed["payment_verified"], true);
}

#[tokio::test]
async fn test_cancel_72h_before_refunds_fully() {
    let app = test_app();
    seed_unit(&app).await;
    let id = confirmed_booking(&app).await;

    app.clock.set(ts("2025-01-07 14:00"));
    let (_, quote) = call(
        &app.state,
        "GET",
        &format!("/api/bookings/{id}/cancellation-quote"),
        Some(&guest("G1")),
        None,
    )
    .await;
    assert_eq!(quote["refund_percent"], 100);
    assert_eq!(quote["hours_until_check_in"], 72);

    let (status, cancelled) = call(
        &app.state,
        "POST",
        &format!("/api/bookings/{id}/cancel"),
        Some(&guest("G1")),
        Some(json!({"reason": "flight cancelled"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["refund_percent"], 100);

    let (_, calendar) = call(&app.state, "GET", "/api/units/U1/calendar", Some(&staff()), None).await;
    assert!(calendar.as_array().unwrap().is_empty());

    let (status, err) = call(&app.state, "POST", &format!("/api/bookings/{id}/check-in"), Some(&staff()), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "invalid_transition");
}

#[tokio::test]
async fn test_checked_in_cannot_cancel() {
    let app = test_app();
    seed_unit(&app).await;
    let id = confirmed_booking(&app).await;

    let (status, checked_in) = call(&app.state, "POST", &format!("/api/bookings/{id}/check-in"), Some(&staff()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(checked_in["status"], "checked_in");

    let (status, err) = call(&app.state, "POST", &format!("/api/bookings/{id}/cancel"), Some(&guest("G1")), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "invalid_transition");
}

#[tokio::test]
async fn test_complete_then_review_once_and_edit_window() {
    let app = test_app();
    seed_unit(&app).await;
    let id = confirmed_booking(&app).await;

    call(&app.state, "POST", &format!("/api/bookings/{id}/check-in"), Some(&staff()), None).await;
    let (status, done) = call(&app.state, "POST", &format!("/api/bookings/{id}/complete"), Some(&staff()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "completed");

    let (status, review) = call(
        &app.state,
        "POST",
        &format!("/api/bookings/{id}/review"),
        Some(&guest("G1")),
        Some(json!({"rating": 5, "comment": "Quiet and clean"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let review_id = review["id"].as_str().unwrap();

    let (status, err) = call(
        &app.state,
        "POST",
        &format!("/api/bookings/{id}/review"),
        Some(&guest("G1")),
        Some(json!({"rating": 4})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "review_already_exists");

    app.clock.advance(Duration::hours(25));
    let (status, err) = call(
        &app.state,
        "PUT",
        &format!("/api/reviews/{review_id}"),
        Some(&guest("G1")),
        Some(json!({"rating": 3, "comment": "On reflection"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "edit_window_expired");

    let (_, listing) = call(&app.state, "GET", "/api/businesses/B1/reviews", Some(&guest("G7")), None).await;
    assert_eq!(listing["summary"]["review_count"], 1);
    assert_eq!(listing["reviews"][0]["rating"], 5);
}

#[tokio::test]
async fn test_walk_in_is_confirmed_without_proof() {
    let app = test_app();
    seed_unit(&app).await;

    let (status, booking) = call(
        &app.state,
        "POST",
        "/api/bookings",
        Some(&staff()),
        Some(json!({
            "unit_id": "U1",
            "guest_id": "G5",
            "check_in": "2025-01-01",
            "check_out": "2025-01-03",
            "total_price": 500000
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "confirmed");
    assert_eq!(booking["payment_verified"], true);
    assert_eq!(booking["created_by"], "staff");

    let id = booking["id"].as_str().unwrap();
    let (_, history) = call(&app.state, "GET", &format!("/api/bookings/{id}/history"), Some(&guest("G5")), None).await;
    assert_eq!(history[0]["to_status"], "confirmed");
    assert_eq!(history[0]["actor_id"], "S1");

    // no separate confirm call happens, so creation announces both
    assert_eq!(app.sink.kinds(), vec!["booking_created", "booking_confirmed"]);
}

#[tokio::test]
async fn test_price_ceiling_keeps_cancellation_working() {
    let app = test_app();
    seed_unit(&app).await;

    let over = json!({
        "unit_id": "U1",
        "check_in": "2025-01-10",
        "check_out": "2025-01-12",
        "total_price": i64::MAX
    });
    let (status, err) = call(&app.state, "POST", "/api/bookings", Some(&guest("G1")), Some(over)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["code"], "validation_error");

    let (status, booking) = call(
        &app.state,
        "POST",
        "/api/bookings",
        Some(&staff()),
        Some(json!({
            "unit_id": "U1",
            "guest_id": "G1",
            "check_in": "2025-01-10",
            "check_out": "2025-01-12",
            "total_price": registry::MAX_TOTAL_PRICE
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = booking["id"].as_str().unwrap();

    let (status, quote) = call(
        &app.state,
        "GET",
        &format!("/api/bookings/{id}/cancellation-quote"),
        Some(&guest("G1")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["refund_amount"], registry::MAX_TOTAL_PRICE);

    let (status, cancelled) = call(&app.state, "POST", &format!("/api/bookings/{id}/cancel"), Some(&guest("G1")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, _) = call(&app.state, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = book(&app, &guest("G2"), "2025-01-10", "2025-01-12").await;
    assert_eq!(status, StatusCode::CREATED);
}

// ── Gating and visibility ──

#[tokio::test]
async fn test_module_disabled_blocks_creation() {
    let app = test_app();
    seed_unit(&app).await;
    set_module_enabled(&app.state.conn().unwrap(), "B1", Module::Booking, false).unwrap();

    let (status, err) = book(&app, &guest("G1"), "2025-01-10", "2025-01-12").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["code"], "module_disabled");
}

#[tokio::test]
async fn test_confirm_without_payment_is_rejected() {
    let app = test_app();
    seed_unit(&app).await;
    let (_, booking) = book(&app, &guest("G1"), "2025-01-10", "2025-01-12").await;
    let id = booking["id"].as_str().unwrap();

    let (status, err) = call(&app.state, "POST", &format!("/api/bookings/{id}/confirm"), Some(&staff()), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "payment_not_verified");
}

#[tokio::test]
async fn test_stale_version_is_reported() {
    let app = test_app();
    seed_unit(&app).await;
    let id = confirmed_booking(&app).await;

    let (status, err) = call(
        &app.state,
        "POST",
        &format!("/api/bookings/{id}/check-in"),
        Some(&staff()),
        Some(json!({"expected_version": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "stale_state");
}

#[tokio::test]
async fn test_guests_see_only_their_bookings() {
    let app = test_app();
    seed_unit(&app).await;
    let (_, booking) = book(&app, &guest("G1"), "2025-01-10", "2025-01-12").await;
    let id = booking["id"].as_str().unwrap();

    let (status, _) = call(&app.state, "GET", &format!("/api/bookings/{id}"), Some(&guest("G2")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app.state, "GET", "/api/bookings?guest_id=G1", Some(&guest("G2")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, list) = call(&app.state, "GET", "/api/bookings?unit_id=U1", Some(&staff()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (_, list) = call(&app.state, "GET", "/api/bookings?unit_id=U1", Some(&Actor::staff("S9", "B2")), None).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_events_follow_the_lifecycle() {
    let app = test_app();
    seed_unit(&app).await;
    let mut rx = app.state.events_tx.subscribe();
    let id = confirmed_booking(&app).await;

    assert_eq!(
        app.sink.kinds(),
        vec!["booking_created", "payment_submitted", "payment_verified", "booking_confirmed"]
    );
    let first = rx.try_recv().unwrap();
    assert_eq!(first.event.kind(), "booking_created");
    assert_eq!(first.event.booking_id(), Some(id.as_str()));
    assert!(first.seq > 0);
}

// ── Concurrency ──

#[test]
fn test_no_double_booking_under_concurrent_creates_and_cancels() {
    let app = test_app();
    {
        let db = app.state.conn().unwrap();
        db.execute(
            "INSERT INTO units (id, business_id, name, capacity, nightly_price, status, available, created_at, updated_at)
             VALUES ('U1', 'B1', 'Garden Villa', 4, 250000, 'ready', 1, '2025-01-01 00:00:00', '2025-01-01 00:00:00')",
            [],
        )
        .unwrap();
    }

    let ranges = [
        ("2025-01-10", "2025-01-12"),
        ("2025-01-11", "2025-01-13"),
        ("2025-01-12", "2025-01-14"),
        ("2025-01-09", "2025-01-11"),
        ("2025-01-13", "2025-01-15"),
        ("2025-01-10", "2025-01-15"),
    ];
    let barrier = Arc::new(Barrier::new(ranges.len()));
    let handles: Vec<_> = ranges
        .iter()
        .enumerate()
        .map(|(i, (start, end))| {
            let state = Arc::clone(&app.state);
            let barrier = Arc::clone(&barrier);
            let req = NewBooking {
                unit_id: "U1".to_string(),
                guest_id: None,
                check_in: start.parse().unwrap(),
                check_out: end.parse().unwrap(),
                total_price: 500_000,
                guest_count: None,
            };
            thread::spawn(move || {
                barrier.wait();
                let guest = Actor::guest(format!("G{i}"));
                let created = registry::create(&state, req, &guest);
                // half the winners change their mind straight away
                if let Ok(booking) = &created {
                    if i % 2 == 0 {
                        let _ = staybook::services::lifecycle::cancel(&state, &booking.id, &guest, Default::default());
                    }
                }
                created
            })
        })
        .collect();
    for h in handles {
        let _ = h.join().unwrap();
    }

    let live: Vec<_> = registry::list_by_unit(&app.state, "U1")
        .unwrap()
        .into_iter()
        .filter(|b| b.status != BookingStatus::Cancelled)
        .collect();
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            assert!(
                !(a.check_in < b.check_out && b.check_in < a.check_out),
                "{} and {} overlap",
                a.id,
                b.id
            );
        }
    }
    let windows = staybook::services::ledger::unit_calendar(&app.state.conn().unwrap(), "U1").unwrap();
    assert_eq!(windows.len(), live.len());
}
