//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server.
//! Requires a running Redis instance.
//!
//! ```bash
//! REDIS_URL="redis://localhost:6379" \
//!   cargo test -p courier-api --test integration -- --ignored --nocapture
//! ```

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;
use uuid::Uuid;

use courier_api::routes::create_router;
use courier_api::state::AppState;
use courier_common::config::AppConfig;
use courier_common::redis_pool::create_redis_pool;
use courier_delivery::status::StatusStore;

// ============================================================
// Helpers
// ============================================================

fn test_config() -> AppConfig {
    AppConfig {
        amqp_url: "amqp://unused".to_string(),
        redis_url: std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        notifications_exchange: "notifications.direct".to_string(),
        email_queue: "email.queue".to_string(),
        retry_exchange: "notifications.retry".to_string(),
        dead_letter_exchange: "notifications.dlx".to_string(),
        status_exchange: None,
        prefetch_count: 10,
        template_service_url: "http://unused".to_string(),
        template_service_token: "unused".to_string(),
        render_timeout_secs: 10,
        smtp_host: "localhost".to_string(),
        smtp_port: 587,
        smtp_username: "unused@example.com".to_string(),
        smtp_password: "unused".to_string(),
        smtp_use_tls: false,
        status_ttl_secs: 60,
        breaker_fail_max: 5,
        breaker_reset_timeout_secs: 60,
        retry_base_delay_ms: 1_000,
        retry_max_delay_ms: 60_000,
        retry_max_attempts: 5,
    }
}

async fn test_state() -> AppState {
    let config = test_config();
    let redis = create_redis_pool(&config.redis_url)
        .await
        .expect("Redis connection");
    AppState::new(redis, config)
}

async fn get(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
    let app = create_router(state);
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

// ============================================================
// Tests
// ============================================================

#[tokio::test]
#[ignore]
async fn test_health_reports_ok() {
    let (status, body) = get(test_state().await, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "courier-api");
}

#[tokio::test]
#[ignore]
async fn test_status_lookup_unknown_request_id_is_404() {
    let uri = format!("/api/v1/notifications/unknown-{}/status", Uuid::new_v4());
    let (status, _) = get(test_state().await, &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore]
async fn test_status_lookup_returns_latest_record() {
    let state = test_state().await;
    let request_id = format!("api-test-{}", Uuid::new_v4());

    let store = StatusStore::new(state.redis.clone(), state.config.status_ttl_secs);
    store
        .set_failed(&request_id, "smtp send failed")
        .await
        .unwrap();

    let uri = format!("/api/v1/notifications/{request_id}/status");
    let (status, body) = get(state.clone(), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["request_id"], request_id.as_str());
    assert_eq!(body["state"], "failed");
    assert_eq!(body["error"], "smtp send failed");

    // A later success fully overwrites the record, including the error field
    store.set_delivered(&request_id).await.unwrap();
    let (status, body) = get(state, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "delivered");
    assert!(body.get("error").is_none());
}
