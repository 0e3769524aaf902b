//! Router-level checks: auth, role gating and error bodies over HTTP.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use spv_distributions::api::create_router;
use spv_distributions::auth::{JwtHandler, Principal, Role};
use spv_distributions::distribution::{
    DistributionLedger, DistributionService, LogNotifier, NotificationDispatcher,
};
use tempfile::NamedTempFile;
use tower::ServiceExt;

const SECRET: &str = "http-test-secret-that-is-long-enough";

struct TestApp {
    router: Router,
    jwt: JwtHandler,
    _db: NamedTempFile,
}

impl TestApp {
    fn new() -> Self {
        let db = NamedTempFile::new().unwrap();
        let ledger = DistributionLedger::new(db.path().to_str().unwrap()).unwrap();
        let service = DistributionService::new(
            Arc::new(ledger),
            NotificationDispatcher::new(Arc::new(LogNotifier)),
        );
        let router = create_router(Arc::new(service), Arc::new(JwtHandler::new(SECRET.to_string())));
        Self {
            router,
            jwt: JwtHandler::new(SECRET.to_string()),
            _db: db,
        }
    }

    fn token(&self, id: &str, role: Role) -> String {
        self.jwt.generate_token(&Principal::new(id, role)).unwrap().0
    }

    async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

fn create_body() -> Value {
    json!({
        "projectId": "proj-1",
        "spvId": "spv-1",
        "distributionType": "sale_proceeds",
        "grossProceeds": 1_000_000,
        "deductions": [{ "description": "brokerage", "amount": 50_000 }],
        "platformFees": [{ "description": "platform fee", "amount": 20_000 }],
        "tdsRateBps": 2_000,
        "snapshot": {
            "recordDate": "2026-03-31",
            "totalShares": 100,
            "holdings": [
                { "investorId": "A", "shares": 60 },
                { "investorId": "B", "shares": 40 }
            ]
        }
    })
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new();
    let (status, body) = app.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_api_requires_bearer_token() {
    let app = TestApp::new();

    let (status, body) = app.call("GET", "/api/distributions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app
        .call("GET", "/api/distributions", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_full_approval_and_payment_flow() {
    let app = TestApp::new();
    let am = app.token("am-1", Role::AssetManager);
    let co = app.token("co-1", Role::Compliance);
    let ad = app.token("ad-1", Role::Admin);

    let (status, dist) = app
        .call("POST", "/api/distributions", Some(&am), Some(create_body()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(dist["status"], "calculated");
    assert_eq!(dist["netDistributableAmount"], 930_000);
    assert_eq!(dist["investorDistributions"][0]["netAmount"], 446_400);
    let id = dist["id"].as_str().unwrap().to_string();

    // Compliance cannot sign before the asset manager
    let (status, body) = app
        .call("POST", &format!("/api/distributions/{id}/approve-compliance"), Some(&co), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "missing_prerequisite");
    assert_eq!(body["missingStage"], "asset_manager");

    // Wrong role for the stage
    let (status, _) = app
        .call("POST", &format!("/api/distributions/{id}/approve-asset-manager"), Some(&co), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(
            "POST",
            &format!("/api/distributions/{id}/approve-asset-manager"),
            Some(&am),
            Some(json!({ "comments": "checked" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call("POST", &format!("/api/distributions/{id}/approve-asset-manager"), Some(&am), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_approved");
    assert_eq!(body["approval"]["approvedBy"], "am-1");
    assert_eq!(body["approval"]["comments"], "checked");

    let (status, _) = app
        .call("POST", &format!("/api/distributions/{id}/approve-compliance"), Some(&co), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, approved) = app
        .call("POST", &format!("/api/distributions/{id}/approve-admin"), Some(&ad), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");

    let paid_uri = format!("/api/distributions/{id}/investors/A/mark-paid");
    let confirmation = json!({ "utr": "UTR-0001", "paymentDate": "2026-04-15" });

    let (status, _) = app
        .call("POST", &paid_uri, Some(&am), Some(confirmation.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call("POST", &paid_uri, Some(&ad), Some(json!({ "paymentDate": "2026-04-15" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, receipt) = app
        .call("POST", &paid_uri, Some(&ad), Some(confirmation.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["replayed"], false);
    assert_eq!(receipt["distribution"]["status"], "processing");

    let (status, receipt) = app
        .call("POST", &paid_uri, Some(&ad), Some(confirmation))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["replayed"], true);

    let (status, body) = app
        .call(
            "POST",
            &paid_uri,
            Some(&ad),
            Some(json!({ "utr": "UTR-9999", "paymentDate": "2026-04-16" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_paid");

    let (status, history) = app
        .call("GET", &format!("/api/distributions/{id}/investors/A/payments"), Some(&ad), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["count"], 1);

    // Investor A sees only their own line
    let investor = app.token("A", Role::Investor);
    let (status, mine) = app
        .call("GET", "/api/distributions/my-distributions", Some(&investor), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["count"], 1);
    let lines = mine["distributions"][0]["investorDistributions"].as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["investorId"], "A");
    assert_eq!(lines[0]["paymentStatus"], "completed");

    let (status, _) = app
        .call("GET", "/api/distributions", Some(&investor), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_distribution_is_not_found() {
    let app = TestApp::new();
    let ad = app.token("ad-1", Role::Admin);
    let (status, body) = app
        .call("GET", "/api/distributions/does-not-exist", Some(&ad), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_invalid_snapshot_is_unprocessable() {
    let app = TestApp::new();
    let am = app.token("am-1", Role::AssetManager);
    let mut body = create_body();
    body["snapshot"]["totalShares"] = json!(0);
    body["snapshot"]["holdings"] = json!([]);

    let (status, _) = app
        .call("POST", "/api/distributions", Some(&am), Some(body))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_investor_cannot_create() {
    let app = TestApp::new();
    let investor = app.token("A", Role::Investor);
    let (status, _) = app
        .call("POST", "/api/distributions", Some(&investor), Some(create_body()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_pending_review_follows_the_chain() {
    let app = TestApp::new();
    let am = app.token("am-1", Role::AssetManager);
    let co = app.token("co-1", Role::Compliance);

    let (_, dist) = app
        .call("POST", "/api/distributions", Some(&am), Some(create_body()))
        .await;
    let id = dist["id"].as_str().unwrap().to_string();

    let (_, queue) = app
        .call("GET", "/api/distributions/pending-review", Some(&co), None)
        .await;
    assert_eq!(queue["count"], 0);

    app.call("POST", &format!("/api/distributions/{id}/approve-asset-manager"), Some(&am), Some(json!({})))
        .await;

    let (_, queue) = app
        .call("GET", "/api/distributions/pending-review", Some(&co), None)
        .await;
    assert_eq!(queue["count"], 1);
    assert_eq!(queue["distributions"][0]["id"], id);

    let (_, second) = app
        .call("POST", "/api/distributions", Some(&am), Some(create_body()))
        .await;
    let second_id = second["id"].as_str().unwrap().to_string();
    app.call("POST", &format!("/api/distributions/{second_id}/approve-asset-manager"), Some(&am), Some(json!({})))
        .await;

    let (_, queue) = app
        .call("GET", "/api/distributions/pending-review", Some(&co), None)
        .await;
    assert_eq!(queue["count"], 2);
    let (status, page) = app
        .call("GET", "/api/distributions/pending-review?limit=1&offset=1", Some(&co), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["count"], 1);
    assert_eq!(page["distributions"][0]["id"], queue["distributions"][1]["id"]);
}
