//! Integration tests for the FX-SmartSave and rates endpoints
//!
//! Tests cover:
//! - Recommendation when a foreign currency beats USD after fees
//! - The conversion fee applied to the USD baseline as well
//! - Input validation and unsupported currencies
//! - Per-client rate limiting
//! - Current rate snapshot and health reporting

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{create_test_app, create_test_app_with, TestOptions};
use serde_json::{json, Value};

fn decimal(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.as_f64().unwrap(),
    }
}

#[tokio::test]
async fn test_cheaper_foreign_currency_is_recommended() {
    let app = create_test_app();

    let (status, body) = app
        .post_json(
            "/api/fx/smart-save",
            json!({
                "product_type": "hotel",
                "prices": [
                    {"currency": "USD", "amount": "1000.00"},
                    {"currency": "eur", "amount": "900.00"}
                ],
                "context": {"city": "PAR"}
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recommended_currency"], "EUR");
    assert_eq!(body["show_recommendation"], true);
    assert_eq!(body["quotes"].as_array().unwrap().len(), 2);
    // 900 EUR * 1.08 * 1.01 = 981.72 against 1000 USD * 1.01
    let savings = decimal(&body["savings_usd"]);
    assert!((savings - 28.28).abs() < 1e-6, "savings was {}", savings);
    assert!((decimal(&body["baseline_usd"]) - 1010.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_fee_applies_to_usd_baseline() {
    let app = create_test_app();

    let (status, body) = app
        .post_json(
            "/api/fx/smart-save",
            json!({
                "product_type": "flight",
                "prices": [
                    {"currency": "USD", "amount": "1000"},
                    {"currency": "EUR", "amount": "920"}
                ]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recommended_currency"], "EUR");
    assert_eq!(body["show_recommendation"], true);
    let usd = body["quotes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|q| q["currency"] == "USD")
        .unwrap();
    assert!((decimal(&usd["effective_cost_usd"]) - 1010.0).abs() < 1e-9);
    let savings = decimal(&body["savings_usd"]);
    assert!((savings - 6.464).abs() < 1e-9, "savings was {}", savings);
}

#[tokio::test]
async fn test_duplicate_currency_is_rejected() {
    let app = create_test_app();

    let (status, body) = app
        .post_json(
            "/api/fx/smart-save",
            json!({
                "product_type": "car",
                "prices": [
                    {"currency": "EUR", "amount": "100"},
                    {"currency": "eur", "amount": "110"}
                ]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unknown_currency_is_unsupported() {
    let app = create_test_app();

    let (status, body) = app
        .post_json(
            "/api/fx/smart-save",
            json!({
                "product_type": "hotel",
                "prices": [
                    {"currency": "USD", "amount": "100"},
                    {"currency": "XTS", "amount": "90"}
                ]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "UNSUPPORTED_CURRENCY");
}

#[tokio::test]
async fn test_rate_limit_is_per_client() {
    let app = create_test_app_with(TestOptions {
        smart_save_requests_per_window: 2,
    });
    let request = |client: &str| {
        Request::builder()
            .method("POST")
            .uri("/api/fx/smart-save")
            .header("content-type", "application/json")
            .header("x-client-id", client)
            .body(Body::from(
                json!({
                    "product_type": "hotel",
                    "prices": [{"currency": "USD", "amount": "250"}]
                })
                .to_string(),
            ))
            .unwrap()
    };

    for _ in 0..2 {
        let (status, _) = app.send(request("web-1")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = app.send(request("web-1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "RATE_LIMITED");

    let (status, _) = app.send(request("web-2")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_current_rates() {
    let app = create_test_app();

    let (status, body) = app.get("/api/fx/rates").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["base"], "USD");
    assert_eq!(body["source"], "fixed");
    assert!((decimal(&body["rates"]["EUR"]) - 1.08).abs() < 1e-9);
    assert!((decimal(&body["rates"]["USD"]) - 1.0).abs() < 1e-9);
    assert!(body["as_of"].is_string());
}

#[tokio::test]
async fn test_health_reports_rate_provider() {
    let app = create_test_app();

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Healthy");
    assert_eq!(body["checks"]["fx_rates"]["status"], "Up");

    let (status, body) = app.get("/health/live").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}
