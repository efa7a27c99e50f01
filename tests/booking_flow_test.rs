//! End-to-end booking flow through the HTTP router
//!
//! Tests cover:
//! - Provisional booking creation and client-request idempotency
//! - Price change and sold-out handling at prebooking
//! - Checkout session reuse
//! - Webhook confirmation, redelivery and signature rejection
//! - Status polling as a fallback for missed webhooks
//! - Pay-at-property bookings and cancellation

mod common;

use axum::http::StatusCode;
use common::{create_test_app, hotel_offer, session_event, sign};
use serde_json::json;
use wayfare_backend::bookings::types::Price;

#[tokio::test]
async fn test_create_booking_is_idempotent_per_client_request() {
    let app = create_test_app();
    let offer = hotel_offer(45_000, false);

    let (status, first) = app.create_booking("req-idem-1", &offer).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "pending_payment");
    assert_eq!(first["payment_status"], "none");
    assert_eq!(first["amount"]["amount_minor"], 45_000);

    let (status, second) = app.create_booking("req-idem-1", &offer).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["booking_id"], first["booking_id"]);
    assert_eq!(app.repository.count().await, 1);
}

#[tokio::test]
async fn test_price_change_blocks_booking() {
    let app = create_test_app();
    app.supplier.reprice_to(Price::new(47_500, "USD"));

    let (status, body) = app.create_booking("req-price", &hotel_offer(45_000, false)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "PRICE_CHANGED");
    assert_eq!(body["details"]["price"]["amount_minor"], 47_500);
    assert_eq!(body["details"]["original_price"]["amount_minor"], 45_000);
    assert_eq!(app.repository.count().await, 0);
}

#[tokio::test]
async fn test_validate_reports_sold_out_offer() {
    let app = create_test_app();
    app.supplier.sell_out();
    let offer = hotel_offer(45_000, false);

    let (status, body) = app
        .post_json(
            "/api/bookings/validate",
            json!({
                "product_type": "hotel",
                "offer": offer,
                "client_request_id": "req-sold-out",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    assert_eq!(body["code"], "OFFER_UNAVAILABLE");
}

#[tokio::test]
async fn test_checkout_webhook_confirms_booking() {
    let app = create_test_app();
    let (_, booking) = app.create_booking("req-flow", &hotel_offer(45_000, false)).await;
    let booking_id = booking["booking_id"].as_str().unwrap().to_string();

    let (status, checkout) = app.open_checkout(&booking_id, "checkout-key-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(checkout["reused"], false);
    let session_id = checkout["session_id"].as_str().unwrap().to_string();

    // A second click returns the same open session
    let (status, again) = app.open_checkout(&booking_id, "checkout-key-2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["session_id"], session_id.as_str());
    assert_eq!(again["reused"], true);
    assert_eq!(app.checkout.session_count(), 1);

    let (_, pending) = app.get(&format!("/api/bookings/{}/status", booking_id)).await;
    assert_eq!(pending["stage"], "awaiting_payment");
    assert!(pending["checkout_url"].is_string());

    let paid = app.checkout.mark_paid(&session_id);
    let payload = session_event("evt_1", "checkout.session.completed", &paid);
    let signature = sign(&payload);

    let (status, body) = app.deliver_webhook(payload.clone(), &signature).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["result"]["outcome"], "applied");
    assert_eq!(app.stored_status(&booking_id).await, "confirmed");

    // Redelivery is acknowledged without another transition
    let (status, body) = app.deliver_webhook(payload, &signature).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["outcome"], "duplicate");

    let (status, view) = app.get(&format!("/api/bookings/{}/status", booking_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "confirmed");
    assert_eq!(view["payment_status"], "succeeded");
    assert_eq!(view["stage"], "confirmed");
    assert!(view["confirmed_at"].is_string());
}

#[tokio::test]
async fn test_webhook_with_bad_signature_is_rejected() {
    let app = create_test_app();
    let (_, booking) = app.create_booking("req-forged", &hotel_offer(30_000, false)).await;
    let booking_id = booking["booking_id"].as_str().unwrap().to_string();
    let (_, checkout) = app.open_checkout(&booking_id, "key-forged").await;
    let paid = app
        .checkout
        .mark_paid(checkout["session_id"].as_str().unwrap());

    let payload = session_event("evt_forged", "checkout.session.completed", &paid);
    let (status, body) = app
        .deliver_webhook(payload, "t=1700000000,v1=deadbeef")
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_SIGNATURE");
    assert_eq!(app.stored_status(&booking_id).await, "pending_payment");
}

#[tokio::test]
async fn test_status_poll_confirms_when_webhook_is_missed() {
    let app = create_test_app();
    let (_, booking) = app.create_booking("req-poll", &hotel_offer(52_000, false)).await;
    let booking_id = booking["booking_id"].as_str().unwrap().to_string();
    let (_, checkout) = app.open_checkout(&booking_id, "key-poll").await;
    app.checkout
        .mark_paid(checkout["session_id"].as_str().unwrap());

    let (status, view) = app.get(&format!("/api/bookings/{}/status", booking_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "confirmed");
    assert_eq!(app.stored_status(&booking_id).await, "confirmed");
}

#[tokio::test]
async fn test_pay_at_property_confirms_without_checkout() {
    let app = create_test_app();
    let (status, booking) = app
        .create_booking("req-property", &hotel_offer(61_000, true))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "confirmed_without_payment");

    let booking_id = booking["booking_id"].as_str().unwrap().to_string();
    let (status, body) = app.open_checkout(&booking_id, "key-property").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "INVALID_STATE");
    assert_eq!(app.checkout.session_count(), 0);
}

#[tokio::test]
async fn test_cancelled_booking_cannot_open_checkout() {
    let app = create_test_app();
    let (_, booking) = app.create_booking("req-cancel", &hotel_offer(20_000, false)).await;
    let booking_id = booking["booking_id"].as_str().unwrap().to_string();

    let (status, cancelled) = app
        .post_json(
            &format!("/api/bookings/{}/cancel", booking_id),
            json!({"reason": "changed plans"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["cancelled_by"], "customer");

    let (status, _) = app.open_checkout(&booking_id, "key-cancel").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_public_cancel_is_always_by_customer() {
    let app = create_test_app();
    let (_, booking) = app.create_booking("req-actor", &hotel_offer(20_000, false)).await;
    let booking_id = booking["booking_id"].as_str().unwrap().to_string();

    let (status, cancelled) = app
        .post_json(
            &format!("/api/bookings/{}/cancel", booking_id),
            json!({"actor": "operator", "reason": "fraud review"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["cancelled_by"], "customer");
}

#[tokio::test]
async fn test_unknown_booking_status_is_not_found() {
    let app = create_test_app();
    let (status, body) = app
        .get("/api/bookings/7f0c2b4e-2f6a-4c38-9d0e-1f2a3b4c5d6e/status")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "BOOKING_NOT_FOUND");
}

#[tokio::test]
async fn test_search_returns_supplier_offers() {
    let app = create_test_app();
    app.supplier.set_offers(vec![hotel_offer(45_000, false)]);

    let (status, body) = app
        .post_json(
            "/api/search",
            json!({
                "search": {
                    "product_type": "hotel",
                    "city_code": "LIS",
                    "check_in": "2027-05-10",
                    "check_out": "2027-05-13",
                    "adults": 2
                }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currency"], "USD");
    assert_eq!(body["day_offset"], 0);
    assert_eq!(body["offers"].as_array().unwrap().len(), 1);
    assert_eq!(body["offers"][0]["offer_id"], "HOTEL-IT-1");
}

#[tokio::test]
async fn test_search_rejects_invalid_params() {
    let app = create_test_app();
    let (status, body) = app
        .post_json(
            "/api/search",
            json!({
                "search": {
                    "product_type": "hotel",
                    "city_code": "LIS",
                    "check_in": "2027-05-13",
                    "check_out": "2027-05-10",
                    "adults": 2
                }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}
