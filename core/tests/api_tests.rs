// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Intake API tests over the in-memory fakes.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceExt;
use uuid::Uuid;

use image_gateway_core::api::{api_key_fingerprint, router, AppState, AuthService};
use image_gateway_core::coord::{CoordinationStore, MemoryStore};
use image_gateway_core::database::models::Tenant;
use image_gateway_core::database::repositories::{MemoryJobRepository, MemoryTenantRepository};
use image_gateway_core::queue::JobQueue;

const API_KEY: &str = "sk_test_123";
const SALT: &str = "test-salt";

struct TestApp {
    app: Router,
    jobs: Arc<MemoryJobRepository>,
    queue: JobQueue,
    tenants: Arc<MemoryTenantRepository>,
}

fn test_app() -> TestApp {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let jobs = Arc::new(MemoryJobRepository::new());
    let tenants = Arc::new(MemoryTenantRepository::new());
    let queue = JobQueue::new(store);

    let tenant = Tenant {
        id: Uuid::new_v4(),
        name: "acme".into(),
        api_key_fingerprint: api_key_fingerprint(SALT, API_KEY),
        plan_rpm: 60,
        plan_concurrency: 5,
        webhook_url: None,
        webhook_secret: None,
        webhook_enabled: false,
        created_at: Utc::now(),
    };
    tenants.insert(tenant);

    let state = Arc::new(AppState {
        auth: AuthService::new(SALT, tenants.clone()),
        jobs: jobs.clone(),
        queue: queue.clone(),
        max_attempts: 4,
        started_at: Instant::now(),
    });

    TestApp {
        app: router(state),
        jobs,
        queue,
        tenants,
    }
}

fn post_generate(body: &str, idempotency_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/images/generate")
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY);
    if let Some(key) = idempotency_key {
        builder = builder.header("idempotency-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_requires_no_auth() {
    let test_app = test_app();
    let response = test_app
        .app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_generate_requires_auth() {
    let test_app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/images/generate")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"prompt":"A red apple"}"#))
        .unwrap();
    let response = test_app.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_generate_accepts_job() {
    let test_app = test_app();
    let response = test_app
        .app
        .oneshot(post_generate(
            r#"{"prompt":"A red apple","mode":"final"}"#,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "QUEUED");
    let job_id = body["jobId"].as_str().unwrap().to_string();

    // The job is queued for the worker
    assert_eq!(test_app.queue.pop_due().await.unwrap(), Some(job_id));
}

#[tokio::test]
async fn test_idempotent_submission() {
    let test_app = test_app();
    let body = r#"{"prompt":"A red apple"}"#;

    let first = test_app
        .app
        .clone()
        .oneshot(post_generate(body, Some("K1")))
        .await
        .unwrap();
    let second = test_app
        .app
        .oneshot(post_generate(body, Some("K1")))
        .await
        .unwrap();

    let first_id = body_json(first).await["jobId"].as_str().unwrap().to_string();
    let second_id = body_json(second).await["jobId"].as_str().unwrap().to_string();
    assert_eq!(first_id, second_id);
    assert_eq!(test_app.jobs.len(), 1);
}

#[tokio::test]
async fn test_validation_failures() {
    let cases = [
        r#"{"prompt":""}"#,
        r#"{"prompt":"ok","sampleCount":11}"#,
        r#"{"prompt":"ok","sampleCount":0}"#,
        r#"{"prompt":"ok","inputImage":"https://example.com/x.png"}"#,
        r#"{"prompt":"ok","mode":"instant"}"#,
        r#"not json"#,
    ];
    for case in cases {
        let test_app = test_app();
        let response = test_app
            .app
            .oneshot(post_generate(case, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "case: {case}");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INVALID_REQUEST", "case: {case}");
    }
}

#[tokio::test]
async fn test_get_job_and_tenant_isolation() {
    let test_app = test_app();
    let response = test_app
        .app
        .clone()
        .oneshot(post_generate(r#"{"prompt":"A red apple"}"#, None))
        .await
        .unwrap();
    let job_id = body_json(response).await["jobId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = test_app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1/jobs/{job_id}"))
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["jobId"], job_id.as_str());
    assert_eq!(body["status"], "QUEUED");
    assert_eq!(body["resultUrls"], serde_json::json!([]));

    // A different tenant's key cannot see the job
    let other_key = "sk_other";
    test_app.tenants.insert(Tenant {
        id: Uuid::new_v4(),
        name: "rival".into(),
        api_key_fingerprint: api_key_fingerprint(SALT, other_key),
        plan_rpm: 60,
        plan_concurrency: 5,
        webhook_url: None,
        webhook_secret: None,
        webhook_enabled: false,
        created_at: Utc::now(),
    });
    let response = test_app
        .app
        .oneshot(
            Request::builder()
                .uri(format!("/v1/jobs/{job_id}"))
                .header("x-api-key", other_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_unknown_job_is_404() {
    let test_app = test_app();
    let response = test_app
        .app
        .oneshot(
            Request::builder()
                .uri("/v1/jobs/job_missing")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_list_jobs_pagination() {
    let test_app = test_app();
    for i in 0..3 {
        test_app
            .app
            .clone()
            .oneshot(post_generate(
                &format!(r#"{{"prompt":"Painting number {i}"}}"#),
                None,
            ))
            .await
            .unwrap();
    }

    let response = test_app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/jobs?limit=2")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["hasMore"], true);
    let cursor = body["nextCursor"].as_str().unwrap().to_string();

    let response = test_app
        .app
        .oneshot(
            Request::builder()
                .uri(format!("/v1/jobs?limit=2&cursor={cursor}"))
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn test_list_jobs_rejects_unknown_status() {
    let test_app = test_app();
    let response = test_app
        .app
        .oneshot(
            Request::builder()
                .uri("/v1/jobs?status=EXPLODED")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_flow() {
    let test_app = test_app();
    let response = test_app
        .app
        .clone()
        .oneshot(post_generate(r#"{"prompt":"A red apple"}"#, None))
        .await
        .unwrap();
    let job_id = body_json(response).await["jobId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = test_app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/jobs/{job_id}"))
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "CANCELED");

    // A second cancel is an invalid state transition
    let response = test_app
        .app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/jobs/{job_id}"))
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INVALID_STATE");
}
