//! Common test utilities for wrapgen integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_test::TestServer;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wrapgen_core::UserId;
use wrapgen_service::{create_router, AppState, ArtifactSink, ProviderSettings, ServiceConfig};
use wrapgen_store::RocksStore;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Mock image provider the worker talks to.
    pub provider: MockServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
    /// The admin API key for top-up requests.
    pub admin_key: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh database and mock provider.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a harness after letting the caller adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        Self::build(adjust, None).await
    }

    /// Create a harness whose worker persists artifacts through `sink`.
    pub async fn with_artifact_sink(sink: Arc<dyn ArtifactSink>) -> Self {
        Self::build(|_| {}, Some(sink)).await
    }

    async fn build(
        adjust: impl FnOnce(&mut ServiceConfig),
        sink: Option<Arc<dyn ArtifactSink>>,
    ) -> Self {
        let provider = MockServer::start().await;
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = RocksStore::open(temp_dir.path()).expect("Failed to open store");

        let admin_key = "test-admin-key".to_string();

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            auth_secret: "test-secret".into(),
            admin_api_key: Some(admin_key.clone()),
            // High enough that ordinary tests never trip the limiters.
            user_rate_max: 1000,
            origin_rate_max: 1000,
            reference_image_hosts: vec!["cdn.example.com".into()],
            provider: ProviderSettings {
                base_url: provider.uri(),
                api_key: "test-key".into(),
                primary_model: "img-pro".into(),
                fallback_models: vec!["img-flash".into()],
                optimizer_model: "text-flash".into(),
                timeout_ms: 2000,
                max_retries: 1,
                retry_base_ms: 1,
                retry_max_ms: 5,
                max_total_ms: 10_000,
            },
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let store = Arc::new(store);
        let state = match sink {
            Some(sink) => AppState::with_artifact_sink(store, config, sink),
            None => AppState::new(store, config),
        }
        .expect("Failed to build app state");
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");
        let test_user_id = UserId::generate();

        Self {
            server,
            provider,
            _temp_dir: temp_dir,
            test_user_id,
            admin_key,
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        format!("Bearer test-token:{}", self.test_user_id)
    }

    /// Get a different user's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        let other_user = UserId::generate();
        format!("Bearer test-token:{other_user}")
    }

    /// Credit the test user through the admin top-up endpoint.
    pub async fn top_up(&self, amount: i64) {
        self.server
            .post("/v1/credits/topup")
            .add_header("x-admin-key", self.admin_key.clone())
            .json(&json!({
                "userId": self.test_user_id.to_string(),
                "amount": amount,
                "description": "test top-up"
            }))
            .await
            .assert_status_ok();
    }

    /// Submit a generation with the given idempotency key.
    pub async fn generate(&self, idempotency_key: &str) -> axum_test::TestResponse {
        self.server
            .post("/v1/wraps/generate")
            .add_header("authorization", self.user_auth_header())
            .json(&json!({
                "prompt": "aurora over jagged mountains",
                "modelSlug": "model-3",
                "idempotencyKey": idempotency_key
            }))
            .await
    }

    /// Poll a task until it leaves pending/processing; panics if it never does.
    pub async fn wait_for_terminal(&self, task_id: &str) -> serde_json::Value {
        for _ in 0..500 {
            let response = self
                .server
                .post("/v1/tasks/status")
                .add_header("authorization", self.user_auth_header())
                .json(&json!({ "taskId": task_id }))
                .await;
            response.assert_status_ok();
            let body: serde_json::Value = response.json();
            // "failed" is a transient stop on the way to "failed_refunded";
            // keep polling so assertions see the settled terminal status.
            let status = body["status"].as_str().unwrap_or_default().to_string();
            if status != "pending" && status != "processing" && status != "failed" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reached a terminal status");
    }

    /// Mount a provider mock that answers every image model with a PNG.
    pub async fn mock_provider_success(&self) {
        Mock::given(method("POST"))
            .and(path("/v1beta/models/img-pro:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(image_body()))
            .mount(&self.provider)
            .await;
    }
}

/// A provider response carrying one inline PNG.
pub fn image_body() -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "aW1n" } }
            ]},
            "finishReason": "STOP"
        }],
        "modelVersion": "img-pro-001"
    })
}

/// A provider response with prose but no image payload.
pub fn text_only_body() -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": "cannot comply" }] },
            "finishReason": "STOP"
        }]
    })
}
