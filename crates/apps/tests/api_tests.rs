use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use ethernity_apps::api;
use ethernity_apps::AppState;
use ethernity_core::{ManualClock, Settings};

const ADMIN_TOKEN: &str = "test-admin-token";
const ALICE: &str = "0x1111111111111111111111111111111111111111";
const BOB: &str = "0x2222222222222222222222222222222222222222";
const FUND_ADDRESS: &str = "0x3333333333333333333333333333333333333333";
const RECIPIENT: &str = "0x4444444444444444444444444444444444444444";

fn tx(n: u8) -> String {
    format!("0x{}", format!("{:02x}", n).repeat(32))
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.security.admin_token = ADMIN_TOKEN.to_string();
    settings.rate_limit.enabled = false;
    settings
}

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
}

impl TestApp {
    fn new() -> Self {
        Self::with_settings(test_settings())
    }

    fn with_settings(settings: Settings) -> Self {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()));
        let state = AppState::in_memory(settings, clock.clone());
        Self {
            router: api::router(state),
            clock,
        }
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>, admin: bool) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if admin {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None, false).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body), false).await
    }

    async fn admin_get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None, true).await
    }

    async fn admin_post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body), true).await
    }

    async fn register(&self, wallet: &str) -> Value {
        let (status, user) = self
            .post("/api/v1/users/register", json!({ "wallet_address": wallet }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        user
    }

    /// Registered user with a deployed fund; returns the fund id
    async fn deployed_fund(&self, wallet: &str) -> u64 {
        self.register(wallet).await;
        let (status, fund) = self
            .post(
                &format!("/api/v1/funds/create?wallet_address={}", wallet),
                json!({
                    "principal": "1000",
                    "monthly_deposit": "200",
                    "current_age": 35,
                    "retirement_age": 65,
                    "desired_monthly": "2500",
                    "years_payments": 20,
                    "interest_rate": 500,
                    "timelock_years": 20
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = fund["id"].as_u64().unwrap();

        let (status, _) = self
            .post(
                &format!("/api/v1/funds/{}/complete", id),
                json!({ "fund_address": FUND_ADDRESS, "transaction_hash": tx(1) }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        id
    }
}

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap(),
        other => panic!("not a decimal: {}", other),
    }
}

#[tokio::test]
async fn test_health_is_served_at_root_and_under_prefix() {
    let app = TestApp::new();

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.get("/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().ends_with("backend alive!"));

    let (status, body) = app.get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/v1/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["path"], "/api/v1/does-not-exist");
}

#[tokio::test]
async fn test_security_headers_are_set() {
    let app = TestApp::new();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["x-xss-protection"], "1; mode=block");
}

#[tokio::test]
async fn test_admin_routes_require_bearer_token() {
    let app = TestApp::new();

    let (status, body) = app.get("/api/v1/users/").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Not authenticated");

    let request = Request::builder()
        .uri("/api/v1/users/")
        .header(header::AUTHORIZATION, "Bearer wrong-token")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, body) = app.admin_get("/api/v1/users/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_login_registers_unknown_wallet() {
    let app = TestApp::new();
    let mixed_case = "0xAbCd000000000000000000000000000000000001";

    let (status, body) = app.post(&format!("/api/v1/users/login/{}", mixed_case), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["wallet_address"], mixed_case.to_lowercase());
    assert_eq!(body["token_type"], "bearer");
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    let first_id = body["user"]["id"].as_u64().unwrap();

    let (status, body) = app.post(&format!("/api/v1/users/login/{}", mixed_case), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"].as_u64().unwrap(), first_id);

    let (status, body) = app
        .post("/api/v1/auth/refresh", json!({ "refresh_token": body["refresh_token"] }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = TestApp::new();
    app.register(ALICE).await;

    let (status, _) = app
        .post("/api/v1/users/register", json!({ "wallet_address": ALICE }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.get(&format!("/api/v1/users/wallet/{}", BOB)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "User not found");
}

#[tokio::test]
async fn test_fund_lifecycle() {
    let app = TestApp::new();
    let id = app.deployed_fund(ALICE).await;

    let (status, fund) = app.get(&format!("/api/v1/funds/wallet/{}", ALICE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fund["fund_address"], FUND_ADDRESS);
    assert_eq!(decimal(&fund["total_balance"]), Decimal::from(1164));

    let (status, body) = app
        .post(
            &format!("/api/v1/funds/{}/deposit", id),
            json!({ "transaction_hash": tx(2), "amount": "200", "deposit_type": "extra" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["transaction"]["transaction_type"], "extra_deposit");

    let (status, transactions) = app.get(&format!("/api/v1/funds/{}/transactions", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(transactions.as_array().unwrap().len(), 2);

    let (status, check) = app.get(&format!("/api/v1/funds/{}/can-retire", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["can_retire"], false);

    let (status, _) = app
        .post(
            &format!("/api/v1/funds/{}/withdraw", id),
            json!({ "transaction_hash": tx(3), "amount": "10" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.get("/api/v1/funds/999/transactions").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_second_fund_for_wallet_conflicts() {
    let app = TestApp::new();
    app.deployed_fund(ALICE).await;

    let (status, _) = app
        .post(
            &format!("/api/v1/funds/create?wallet_address={}", ALICE),
            json!({
                "principal": "0",
                "monthly_deposit": "100",
                "current_age": 30,
                "retirement_age": 65,
                "desired_monthly": "1000",
                "years_payments": 10,
                "interest_rate": 300
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_fund_status_filter_is_rejected() {
    let app = TestApp::new();
    let (status, _) = app.admin_get("/api/v1/funds/?retirement_status=sleeping").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.admin_get("/api/v1/funds/?retirement_status=accumulating").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_contact_form() {
    let app = TestApp::new();

    let (status, _) = app
        .post(
            "/api/v1/contact/",
            json!({ "name": "Ada", "email": "not-an-email", "subject": "Question", "message": "How do funds work?" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, created) = app
        .post(
            "/api/v1/contact/",
            json!({ "name": "Ada", "email": "ada@example.com", "subject": "Question", "message": "How do funds work?" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_u64().unwrap();

    let (status, stats) = app.admin_get("/api/v1/contact/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["unread"], 1);

    let (status, _) = app
        .send(
            Method::DELETE,
            &format!("/api/v1/contact/messages/{}", id),
            None,
            true,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.admin_get(&format!("/api/v1/contact/messages/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test_log::test(tokio::test)]
async fn test_governance_treasury_proposal_pays_out() {
    let app = TestApp::new();
    app.deployed_fund(ALICE).await;

    let (status, _) = app
        .admin_post(
            "/api/v1/treasury/fees",
            json!({ "fund_address": FUND_ADDRESS, "amount": "36", "transaction_hash": tx(4) }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, holder) = app.admin_post("/api/v1/tokens/mint", json!({ "wallet_address": ALICE })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(holder["is_active"], true);

    let (status, proposal) = app
        .post(
            &format!("/api/v1/governance/proposals?wallet_address={}", ALICE),
            json!({
                "title": "Fund the audit",
                "description": "Pay the auditors from the treasury",
                "proposal_type": 2,
                "target_address": RECIPIENT,
                "target_value": "10"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = proposal["proposal_id"].as_u64().unwrap();

    let (status, _) = app
        .post(
            &format!("/api/v1/governance/proposals/{}/vote?wallet_address={}", id, ALICE),
            json!({ "support": true }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.clock.advance(Duration::days(1) + Duration::seconds(1));
    let (status, vote) = app
        .post(
            &format!("/api/v1/governance/proposals/{}/vote?wallet_address={}", id, ALICE),
            json!({ "support": true }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(vote["support"], true);

    let (status, eligibility) = app
        .get(&format!("/api/v1/governance/proposals/{}/can-vote/{}", id, ALICE))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(eligibility["can_vote"], false);

    app.clock.advance(Duration::days(5));
    let (status, executed) = app
        .admin_post(
            &format!("/api/v1/governance/proposals/{}/execute", id),
            json!({ "transaction_hash": tx(5) }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(executed["executed"], true);

    let (status, withdrawals) = app.admin_get("/api/v1/treasury/withdrawals").await;
    assert_eq!(status, StatusCode::OK);
    let withdrawals = withdrawals.as_array().unwrap();
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0]["recipient_address"], RECIPIENT);
    assert_eq!(decimal(&withdrawals[0]["amount"]), Decimal::from(10));

    let (_, stats) = app.get("/api/v1/treasury/stats").await;
    assert_eq!(decimal(&stats["total_fees_collected_usdc"]), Decimal::from(26));
}

#[tokio::test]
async fn test_only_proposer_or_admin_can_cancel() {
    let app = TestApp::new();
    app.register(ALICE).await;
    app.admin_post("/api/v1/tokens/mint", json!({ "wallet_address": ALICE })).await;

    let (_, proposal) = app
        .post(
            &format!("/api/v1/governance/proposals?wallet_address={}", ALICE),
            json!({
                "title": "Raise the quorum",
                "description": "Raise the quorum to thirty percent",
                "proposal_type": 3
            }),
        )
        .await;
    let id = proposal["proposal_id"].as_u64().unwrap();

    let (status, _) = app
        .post(
            &format!("/api/v1/governance/proposals/{}/cancel?wallet_address={}", id, BOB),
            json!({ "reason": "Not yours" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, cancelled) = app
        .admin_post(
            &format!("/api/v1/governance/proposals/{}/cancel?wallet_address={}", id, BOB),
            json!({ "reason": "Duplicate" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["cancelled"], true);

    let (_, cancelled) = app.get("/api/v1/governance/proposals?status=cancelled").await;
    assert_eq!(cancelled.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_proposal_requires_active_holder() {
    let app = TestApp::new();
    app.register(BOB).await;

    let (status, _) = app
        .post(
            &format!("/api/v1/governance/proposals?wallet_address={}", BOB),
            json!({
                "title": "Raise the quorum",
                "description": "Raise the quorum to thirty percent",
                "proposal_type": 3
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_rate_limiter_rejects_excess_requests() {
    let mut settings = test_settings();
    settings.rate_limit.enabled = true;
    settings.rate_limit.per_minute = 2;
    let app = TestApp::with_settings(settings);

    assert_eq!(app.get("/api/v1/protocols/").await.0, StatusCode::OK);
    assert_eq!(app.get("/api/v1/protocols/").await.0, StatusCode::OK);

    let (status, body) = app.get("/api/v1/protocols/").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["retry_after"], 60);

    assert_eq!(app.get("/health").await.0, StatusCode::OK);

    app.clock.advance(Duration::seconds(61));
    assert_eq!(app.get("/api/v1/protocols/").await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limiter_skips_health_under_custom_prefix() {
    let mut settings = test_settings();
    settings.api_prefix = "/v2".to_string();
    settings.rate_limit.enabled = true;
    settings.rate_limit.per_minute = 1;
    let app = TestApp::with_settings(settings);

    assert_eq!(app.get("/v2/protocols/").await.0, StatusCode::OK);
    assert_eq!(app.get("/v2/protocols/").await.0, StatusCode::TOO_MANY_REQUESTS);

    for _ in 0..3 {
        assert_eq!(app.get("/v2/health").await.0, StatusCode::OK);
        assert_eq!(app.get("/health").await.0, StatusCode::OK);
    }
    // The default prefix is just another path now
    assert_eq!(app.get("/api/v1/health").await.0, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_survey_submission_and_stats() {
    let app = TestApp::new();

    let (status, _) = app
        .post(
            "/api/v1/survey/surveys",
            json!({
                "age": "25-34",
                "trust_traditional": -1,
                "blockchain_familiarity": 2,
                "retirement_concern": 2,
                "has_retirement_plan": 0,
                "values_in_retirement": 1,
                "interested_in_blockchain": 2
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .post(
            "/api/v1/survey/surveys/follow-up",
            json!({ "wants_more_info": true, "email": "Grace@Example.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, stats) = app.admin_get("/api/v1/survey/surveys/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_responses"], 1);
    assert_eq!(stats["interest_level"]["high_interest"], 1);

    let (_, emails) = app.admin_get("/api/v1/survey/surveys/emails").await;
    assert_eq!(emails["total"], 1);
    assert_eq!(emails["emails"][0]["email"], "grace@example.com");

    let (_, admin) = app.admin_get("/api/v1/stats/admin/stats").await;
    assert_eq!(admin["surveys"]["total_responses"], 1);
}
