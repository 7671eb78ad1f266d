//! Gateway Integration Tests
//!
//! Requests go through the full router against an in-memory ledger.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::router;
use super::state::AppState;
use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::ledger::{MemoryAccount, MemoryLedger};
use crate::network::ScriptedNetwork;
use crate::service::FundsService;

fn account(id: u64, owner: u64, number: &str, balance: u64) -> MemoryAccount {
    MemoryAccount {
        account_id: id,
        owner_id: owner,
        account_number: number.to_string(),
        holder_name: format!("Holder {}", id),
        balance,
        pin: "1234".to_string(),
        daily_withdrawal_limit: 60_000,
        daily_withdrawal_used: 15_000,
    }
}

fn app() -> (Arc<MemoryLedger>, Router) {
    let clock = Arc::new(ManualClock::starting_now());
    let ledger = Arc::new(MemoryLedger::with_accounts(
        clock.clone(),
        vec![
            account(1, 10, "1000000001", 50_000),
            account(2, 20, "1000000002", 0),
        ],
    ));
    let funds = Arc::new(FundsService::new(
        ledger.clone(),
        Arc::new(ScriptedNetwork::found("Lin Park", "Partner Bank")),
        clock,
        EngineConfig::default(),
    ));
    (ledger, router(Arc::new(AppState::new(funds))))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

const ALICE: (&str, &str) = ("X-User-ID", "10");

fn begin_body(amount: &str) -> Value {
    json!({
        "source_account_id": 1,
        "destination": { "account_number": "1000000002" },
        "amount": amount
    })
}

#[tokio::test]
async fn test_health() {
    let (_, app) = app();
    let (status, body) = send(&app, "GET", "/api/v1/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["active_flows"], 0);
}

#[tokio::test]
async fn test_unknown_route_uses_envelope() {
    let (_, app) = app();
    let (status, body) = send(&app, "GET", "/api/v1/nope", &[], None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
}

#[tokio::test]
async fn test_transfer_flow_over_http() {
    let (ledger, app) = app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/transfers",
        &[ALICE],
        Some(begin_body("150.00")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "AUTHORIZE");
    assert_eq!(body["data"]["amount"], "150.00");
    assert_eq!(body["data"]["recipient"]["account_number_masked"], "******0002");
    let handle = body["data"]["handle"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/transfers/{}/authorize", handle),
        &[ALICE],
        Some(json!({ "pin": "1234" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "SUBMIT");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/transfers/{}/submit", handle),
        &[ALICE, ("Idempotency-Key", "http-k1")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "COMPLETED");
    assert_eq!(body["data"]["idempotency_key"], "http-k1");
    assert_eq!(body["data"]["amount"], "150.00");
    assert_eq!(ledger.balance(2), Some(15_000));

    let (status, body) = send(&app, "GET", "/api/v1/submissions/http-k1", &[ALICE], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "COMPLETED");

    // Another caller cannot read the submission, and no caller at all is refused
    let bob = ("X-User-ID", "20");
    let (status, _) = send(&app, "GET", "/api/v1/submissions/http-k1", &[bob], None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", "/api/v1/submissions/http-k1", &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_insufficient_balance_maps_to_422() {
    let (ledger, app) = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/transfers",
        &[ALICE],
        Some(begin_body("600")),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["data"]["error"], "INSUFFICIENT_BALANCE");
    assert_eq!(body["data"]["class"], "LIMIT");
    assert_eq!(ledger.pin_checks(), 0);
}

#[tokio::test]
async fn test_requests_require_caller() {
    let (_, app) = app();
    let (status, _) = send(&app, "POST", "/api/v1/transfers", &[], Some(begin_body("1"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_flow_is_private_to_its_caller() {
    let (_, app) = app();
    let (_, body) = send(
        &app,
        "POST",
        "/api/v1/transfers",
        &[ALICE],
        Some(begin_body("10")),
    )
    .await;
    let handle = body["data"]["handle"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/v1/transfers/{}", handle),
        &[("X-User-ID", "20")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["data"]["error"], "FORBIDDEN");

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/v1/transfers/{}", handle),
        &[ALICE],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "GET",
        &format!("/api/v1/transfers/{}", handle),
        &[ALICE],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_validation_errors_are_400() {
    let (_, app) = app();

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/transfers",
        &[ALICE],
        Some(begin_body("1.005")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/transfers",
        &[ALICE],
        Some(json!({
            "source_account_id": 1,
            "destination": { "account_number": "" },
            "amount": "10"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_atm_code_over_http() {
    let (_, app) = app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/atm/codes",
        &[ALICE, ("Idempotency-Key", "atm-1")],
        Some(json!({ "account_id": 1, "amount": "200" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ACTIVE");
    assert_eq!(body["data"]["amount"], "200.00");
    assert_eq!(body["data"]["remaining_seconds"], 900);
    let code = body["data"]["code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);

    let (status, body) = send(&app, "GET", "/api/v1/atm/codes/1", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["code"], code.as_str());

    // 150 + 200 used; 300 more is over the 600 limit
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/atm/codes",
        &[ALICE],
        Some(json!({ "account_id": 1, "amount": "300" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["data"]["error"], "DAILY_LIMIT_EXCEEDED");

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/atm/codes/1/redeem",
        &[],
        Some(json!({ "code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "CONSUMED");

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/atm/codes/1/redeem",
        &[],
        Some(json!({ "code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_atm_countdown_without_code() {
    let (_, app) = app();
    let (status, body) = send(&app, "GET", "/api/v1/atm/codes/1/countdown", &[], None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["data"]["error"], "NO_ACTIVE_CODE");
}
