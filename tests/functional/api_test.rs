//! HTTP API over a fully wired in-memory state

use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use gen_orchestrator::api::create_router;

use crate::common::{Behavior, Harness};

fn app(h: &Harness) -> Router {
    create_router(h.state.clone())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_providers_and_queue() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 3).await;

    let (status, body) = send(app(&h), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["providers"]["total"], 1);
    assert_eq!(body["providers"]["healthy"], 1);
    assert_eq!(body["queue"]["pending"], 0);
    assert_eq!(body["queue"]["concurrency"], 3);
}

#[tokio::test]
async fn test_generation_then_balance_and_history() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 3).await;
    let org = h.add_org(20).await;
    let product = h.add_product(org).await;

    let (status, body) = send(
        app(&h),
        post_json(
            "/v1/generations",
            json!({
                "organization_id": org,
                "product_id": product,
                "front_count": 2,
                "back_count": 1,
                "quality_mode": "FAST"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["credits_charged"], 9);
    assert_eq!(body["request"]["status"], "DONE");
    assert_eq!(body["images"].as_array().unwrap().len(), 3);

    let (status, body) = send(app(&h), get(&format!("/v1/credits/{}", org))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["remaining_credits"], 11);

    let (status, body) = send(app(&h), get(&format!("/v1/credits/{}/history?limit=1", org))).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["amount"], -9);
    assert_eq!(entries[0]["transaction_type"], "GENERATION");
    assert_eq!(entries[0]["balance_after"], 11);
}

#[tokio::test]
async fn test_insufficient_credits_is_payment_required() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 3).await;
    let org = h.add_org(5).await;
    let product = h.add_product(org).await;

    let (status, body) = send(
        app(&h),
        post_json(
            "/v1/generations",
            json!({
                "organization_id": org,
                "product_id": product,
                "front_count": 2,
                "quality_mode": "HIGH"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn test_all_providers_down_is_bad_gateway() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 1).await;
    h.provider.set("primary", Behavior::Fail);
    let org = h.add_org(20).await;
    let product = h.add_product(org).await;

    let (status, body) = send(
        app(&h),
        post_json(
            "/v1/generations",
            json!({ "organization_id": org, "product_id": product, "front_count": 1 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "zero_success");
    assert_eq!(h.balance(org).await, 20);
}

#[tokio::test]
async fn test_oversized_counts_are_bad_request() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 3).await;
    let org = h.add_org(20).await;
    let product = h.add_product(org).await;

    for uri in ["/v1/generations", "/v1/generations/queued"] {
        let (status, body) = send(
            app(&h),
            post_json(
                uri,
                json!({
                    "organization_id": org,
                    "product_id": product,
                    "front_count": u32::MAX,
                    "back_count": 1
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.balance(org).await, 20);
}

#[tokio::test]
async fn test_queued_generation_lifecycle() {
    let h = Harness::new();
    h.add_provider("primary", 1, None, 1).await;
    let org = h.add_org(0).await;
    let product = h.add_product(org).await;

    let (status, body) = send(
        app(&h),
        post_json(
            "/v1/generations/queued",
            json!({
                "organization_id": org,
                "product_id": product,
                "front_count": 1,
                "back_count": 1
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let request_id = body["request_id"].as_str().unwrap().to_string();
    assert_eq!(body["job_ids"].as_array().unwrap().len(), 2);

    let (_, body) = send(app(&h), get(&format!("/v1/generations/{}", request_id))).await;
    assert_eq!(body["request"]["status"], "PROCESSING");
    assert_eq!(body["jobs"][0]["status"], "pending");

    h.state.queue.run_until_idle().await;

    let (status, body) = send(app(&h), get(&format!("/v1/generations/{}", request_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["request"]["status"], "DONE");
    assert_eq!(body["request"]["credits_consumed"], 10);
    assert_eq!(body["images"].as_array().unwrap().len(), 2);
    assert_eq!(body["jobs"][1]["status"], "completed");
}

#[tokio::test]
async fn test_unknown_resources_are_not_found() {
    let h = Harness::new();

    let (status, body) = send(app(&h), get(&format!("/v1/credits/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = send(app(&h), get(&format!("/v1/generations/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(app(&h), post(&format!("/admin/providers/{}/reset", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_provider_reset() {
    let h = Harness::new();
    let primary = h.add_provider("primary", 1, None, 3).await;
    h.provider.set("primary", Behavior::Fail);
    for _ in 0..2 {
        let _ = h
            .state
            .dispatcher
            .dispatch(Uuid::new_v4(), &sample_options())
            .await;
    }

    let (status, body) = send(app(&h), get("/admin/providers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["error_count"], 6);
    assert_eq!(body[0]["healthy"], false);
    assert!(body[0].get("api_key").is_none());

    let (status, body) = send(app(&h), post(&format!("/admin/providers/{}/reset", primary))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error_count"], 0);
    assert_eq!(body["healthy"], true);
    assert!(body["last_error"].is_null());
}

#[tokio::test]
async fn test_admin_sweep() {
    let h = Harness::new();
    let (status, body) = send(app(&h), post("/admin/queue/sweep")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 0);
}

fn sample_options() -> gen_orchestrator::provider::GenerationOptions {
    gen_orchestrator::provider::GenerationOptions {
        prompt: "Professional fashion photograph of a linen shirt".into(),
        negative_prompt: None,
        aspect_ratio: "3:4".into(),
        resolution: "1K".into(),
        quality_mode: gen_orchestrator::models::QualityMode::Fast,
        side: gen_orchestrator::models::Side::Front,
        index: 0,
        reference_image_url: None,
    }
}
