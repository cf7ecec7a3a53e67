//! Common test utilities

#![allow(dead_code)]

use std::str::FromStr;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::util::ServiceExt;
use uuid::Uuid;

use sacco_ledger::{build_app, Services};

/// Fresh in-memory services and the router over them
pub fn setup_app() -> (Services, Router) {
    let services = Services::in_memory();
    let app = build_app(services.clone());
    (services, app)
}

/// Caller identity sent with each request
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: &'static str,
}

impl Caller {
    pub fn staff() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            role: "staff",
        }
    }

    pub fn member(user_id: Uuid) -> Self {
        Self { user_id, role: "member" }
    }
}

/// Send a request and return the status with the parsed JSON body
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    caller: Option<Caller>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder
            .header("x-user-id", caller.user_id.to_string())
            .header("x-user-role", caller.role);
    }

    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

/// Read a money field that may be encoded as a string or a number
pub fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap(),
        other => panic!("not a money value: {other}"),
    }
}

pub fn id_of(value: &Value) -> Uuid {
    Uuid::parse_str(value["id"].as_str().unwrap()).unwrap()
}

/// Register a member through the API
pub async fn register_member(app: &Router, first_name: &str) -> Uuid {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/members",
        Some(Caller::staff()),
        Some(serde_json::json!({
            "first_name": first_name,
            "last_name": "Otieno",
            "phone": "+254700000001",
            "monthly_income": "60000",
            "loan_repayment_history": 90
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "member registration failed: {body}");
    id_of(&body)
}

/// Open an account for the member and fund it with a cash deposit
pub async fn funded_account(app: &Router, member_id: Uuid, account_type: &str, deposit: &str) -> Uuid {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/accounts",
        Some(Caller::staff()),
        Some(serde_json::json!({ "member_id": member_id, "account_type": account_type })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "account opening failed: {body}");
    let account_id = id_of(&body);

    let (status, body) = send(
        app,
        "POST",
        &format!("/api/v1/accounts/{account_id}/transactions"),
        Some(Caller::member(member_id)),
        Some(serde_json::json!({
            "transaction_type": "deposit",
            "amount": deposit,
            "channel": "cash"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "deposit failed: {body}");
    account_id
}
