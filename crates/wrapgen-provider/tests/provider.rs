//! Provider client integration tests against a mock HTTP server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wrapgen_provider::{
    AttemptFailure, FailureKind, GenerationRequest, ImageInput, PromptOptimizer, ProviderClient,
    ProviderConfig,
};

fn config(server: &MockServer) -> ProviderConfig {
    ProviderConfig {
        base_url: server.uri(),
        api_key: "test-key".into(),
        primary_model: "img-pro".into(),
        fallback_models: vec!["img-flash".into()],
        timeout_ms: 2000,
        max_retries: 2,
        retry_base_ms: 1,
        retry_max_ms: 5,
        max_total_ms: 10_000,
    }
}

fn request() -> GenerationRequest {
    GenerationRequest {
        prompt: "sunset gradient over carbon weave".into(),
        aspect_ratio: "4:3".into(),
        mask: Some(ImageInput::Url("https://cdn.example.com/mask.png".into())),
        references: vec![],
    }
}

fn image_body() -> serde_json::Value {
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

#[tokio::test]
async fn returns_image_on_first_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/img-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = ProviderClient::new(config(&server)).unwrap();
    let result = client.generate(&request()).await;

    let image = result.outcome.unwrap();
    assert_eq!(image.mime_type, "image/png");
    assert_eq!(image.base64, "aW1n");
    assert_eq!(result.model.as_deref(), Some("img-pro"));
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn falls_back_to_next_model_when_primary_returns_no_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/img-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "finishReason": "NO_IMAGE" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/img-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = ProviderClient::new(config(&server)).unwrap();
    let result = client.generate(&request()).await;

    assert!(result.outcome.is_ok());
    assert_eq!(result.model.as_deref(), Some("img-flash"));
    assert_eq!(result.attempts, 2);
}

#[tokio::test]
async fn retries_in_place_on_transient_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/img-pro:generateContent"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/img-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_body()))
        .mount(&server)
        .await;

    let client = ProviderClient::new(config(&server)).unwrap();
    let result = client.generate(&request()).await;

    assert!(result.outcome.is_ok());
    assert_eq!(result.model.as_deref(), Some("img-pro"));
    assert_eq!(result.attempts, 3);
}

#[tokio::test]
async fn prompt_block_aborts_without_trying_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/img-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/img-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_body()))
        .expect(0)
        .mount(&server)
        .await;

    let client = ProviderClient::new(config(&server)).unwrap();
    let result = client.generate(&request()).await;

    let failure = result.outcome.unwrap_err();
    assert_eq!(failure.kind, FailureKind::PromptBlocked);
    assert_eq!(
        failure.diagnostics.prompt_block_reason.as_deref(),
        Some("SAFETY")
    );
}

#[tokio::test]
async fn all_models_exhausted_reports_last_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "cannot comply" }] },
                "finishReason": "STOP"
            }]
        })))
        .mount(&server)
        .await;

    let client = ProviderClient::new(config(&server)).unwrap();
    let result = client.generate(&request()).await;

    let failure = result.outcome.unwrap_err();
    assert_eq!(failure.kind, FailureKind::NoImagePayload);
    // Both models were consulted before giving up.
    assert_eq!(result.attempts, 2);
}

#[tokio::test]
async fn zero_budget_times_out_before_any_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_body()))
        .expect(0)
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.max_total_ms = 0;
    let client = ProviderClient::new(cfg).unwrap();
    let result = client.generate(&request()).await;

    let failure = result.outcome.unwrap_err();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(result.attempts, 0);
}

#[tokio::test]
async fn budget_spent_inside_the_last_attempt_reports_timeout() {
    let server = MockServer::start().await;
    // The sole attempt answers only after the budget is gone, and with a
    // body that would otherwise classify as no_image_payload.
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "candidates": [{
                        "content": { "parts": [{ "text": "cannot comply" }] },
                        "finishReason": "STOP"
                    }]
                }))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.fallback_models = vec![];
    cfg.max_retries = 0;
    cfg.max_total_ms = 100;
    let client = ProviderClient::new(cfg).unwrap();
    let result = client.generate(&request()).await;

    let failure = result.outcome.unwrap_err();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn rate_limit_exhausting_retries_moves_to_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/img-pro:generateContent"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/img-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = ProviderClient::new(config(&server)).unwrap();
    let result = client.generate(&request()).await;

    assert!(result.outcome.is_ok());
    assert_eq!(result.model.as_deref(), Some("img-flash"));
}

#[tokio::test]
async fn fetch_image_base64_encodes_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mask.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"img".to_vec()))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let encoded = wrapgen_provider::fetch_image_base64(&client, &format!("{}/mask.png", server.uri()))
        .await
        .unwrap();
    assert_eq!(encoded, "aW1n");
}

#[tokio::test]
async fn fetch_image_base64_propagates_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let result =
        wrapgen_provider::fetch_image_base64(&client, &format!("{}/missing.png", server.uri()))
            .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn optimizer_rewrites_blocked_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/text-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "abstract crimson geometry\n" }] }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let optimizer = PromptOptimizer::new(server.uri(), "test-key", "text-flash", 2000).unwrap();
    let failure = AttemptFailure::new(FailureKind::PromptBlocked, "blocked");
    let outcome = optimizer.rewrite("blood red dragon", &failure).await;

    assert!(outcome.changed);
    assert_eq!(outcome.prompt, "abstract crimson geometry");
}

#[tokio::test]
async fn optimizer_reports_unchanged_when_rewrite_matches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "ocean waves" }] }
            }]
        })))
        .mount(&server)
        .await;

    let optimizer = PromptOptimizer::new(server.uri(), "test-key", "text-flash", 2000).unwrap();
    let failure = AttemptFailure::new(FailureKind::NoImagePayload, "no image");
    let outcome = optimizer.rewrite("ocean waves", &failure).await;

    assert!(!outcome.changed);
    assert_eq!(outcome.prompt, "ocean waves");
}

#[tokio::test]
async fn optimizer_failure_is_best_effort() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let optimizer = PromptOptimizer::new(server.uri(), "test-key", "text-flash", 2000).unwrap();
    let failure = AttemptFailure::new(FailureKind::PromptBlocked, "blocked");
    let outcome = optimizer.rewrite("anything", &failure).await;

    assert!(!outcome.changed);
    assert_eq!(outcome.prompt, "anything");
}
