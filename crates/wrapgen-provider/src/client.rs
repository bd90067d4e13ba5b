//! The provider HTTP client: model fallback, bounded retry, wall-clock budget.

use std::time::{Duration, Instant};

use base64::Engine;
use reqwest::Client;

use crate::parse::{classify_http_error, classify_response, AttemptFailure, FailureKind};
use crate::types::{GenerateContentResponse, GenerationRequest, ProviderAttemptResult};

/// Provider connection and retry settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API base URL, e.g. `https://generativelanguage.googleapis.com`.
    pub base_url: String,
    /// API key, appended as the `key` query parameter.
    pub api_key: String,
    /// Primary model name.
    pub primary_model: String,
    /// Fallback models, tried in order after the primary.
    pub fallback_models: Vec<String>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// In-place retries per model on transient failures.
    pub max_retries: u32,
    /// Backoff base in milliseconds (`base * 2^attempt`, capped).
    pub retry_base_ms: u64,
    /// Backoff cap in milliseconds.
    pub retry_max_ms: u64,
    /// Hard wall-clock budget across all models and retries.
    pub max_total_ms: u64,
}

impl ProviderConfig {
    /// All model candidates in try order, primary first, deduplicated.
    #[must_use]
    pub fn model_candidates(&self) -> Vec<String> {
        let mut candidates = vec![self.primary_model.clone()];
        for model in &self.fallback_models {
            if !candidates.contains(model) {
                candidates.push(model.clone());
            }
        }
        candidates
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.retry_base_ms.saturating_mul(1 << attempt.min(16));
        Duration::from_millis(exp.min(self.retry_max_ms))
    }
}

/// Client for the image generation API.
///
/// Holds no storage references; callers own all persistence.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    config: ProviderConfig,
}

impl ProviderClient {
    /// Build a client from config.
    ///
    /// # Errors
    ///
    /// Returns the underlying builder error if the TLS backend cannot be
    /// initialized.
    pub fn new(config: ProviderConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { http, config })
    }

    fn model_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }

    fn budget_exhausted(started: Instant, budget: Duration) -> bool {
        started.elapsed() >= budget
    }

    fn timeout_failure(&self) -> AttemptFailure {
        AttemptFailure::new(
            FailureKind::Timeout,
            format!(
                "generation exceeded the {}ms budget",
                self.config.max_total_ms
            ),
        )
    }

    /// Run one generation: primary model, then fallbacks, each with bounded
    /// in-place retries, all under a single wall-clock budget.
    ///
    /// Never returns a transport error directly; everything is classified
    /// into the failure taxonomy.
    pub async fn generate(&self, request: &GenerationRequest) -> ProviderAttemptResult {
        let started = Instant::now();
        let budget = Duration::from_millis(self.config.max_total_ms);
        let body = request.to_wire();

        let mut attempts: u32 = 0;
        let mut last_model = None;
        let mut last_failure: Option<AttemptFailure> = None;

        'models: for model in self.config.model_candidates() {
            let url = self.model_url(&model);

            for attempt in 0..=self.config.max_retries {
                if Self::budget_exhausted(started, budget) {
                    return ProviderAttemptResult {
                        outcome: Err(self.timeout_failure()),
                        model: last_model,
                        attempts,
                    };
                }
                if attempt > 0 {
                    tokio::time::sleep(self.config.backoff_delay(attempt - 1)).await;
                    tracing::warn!(model = %model, attempt, "retrying provider call");
                }

                attempts += 1;
                last_model = Some(model.clone());

                let response = self
                    .http
                    .post(&url)
                    .query(&[("key", self.config.api_key.as_str())])
                    .json(&body)
                    .send()
                    .await;

                let failure = match response {
                    Ok(resp) if resp.status().is_success() => {
                        match resp.json::<GenerateContentResponse>().await {
                            Ok(parsed) => match classify_response(&parsed) {
                                Ok(image) => {
                                    tracing::info!(
                                        model = %model,
                                        attempts,
                                        elapsed_ms = started.elapsed().as_millis() as u64,
                                        "provider returned image"
                                    );
                                    return ProviderAttemptResult {
                                        outcome: Ok(image),
                                        model: Some(model),
                                        attempts,
                                    };
                                }
                                Err(failure) => failure,
                            },
                            Err(e) => AttemptFailure::new(
                                FailureKind::Unknown,
                                format!("malformed provider response: {e}"),
                            ),
                        }
                    }
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        let text = resp.text().await.unwrap_or_default();
                        let failure = classify_http_error(status, &text);
                        // Transient statuses get in-place retries before we
                        // move on to the next model.
                        if failure.retryable
                            && crate::parse::is_retryable_status(status)
                            && attempt < self.config.max_retries
                        {
                            last_failure = Some(failure);
                            continue;
                        }
                        failure
                    }
                    Err(e) if e.is_timeout() || e.is_connect() => {
                        let failure = AttemptFailure {
                            kind: FailureKind::ApiError,
                            retryable: true,
                            message: format!("transport error: {e}"),
                            diagnostics: crate::parse::Diagnostics::default(),
                        };
                        if attempt < self.config.max_retries {
                            last_failure = Some(failure);
                            continue;
                        }
                        failure
                    }
                    Err(e) => {
                        AttemptFailure::new(FailureKind::Unknown, format!("request failed: {e}"))
                    }
                };

                tracing::warn!(
                    model = %model,
                    kind = %failure.kind,
                    retryable = failure.retryable,
                    message = %failure.message,
                    "provider attempt failed"
                );

                if failure.retryable {
                    // Try the next model candidate.
                    last_failure = Some(failure);
                    continue 'models;
                }
                return ProviderAttemptResult {
                    outcome: Err(failure),
                    model: Some(model),
                    attempts,
                };
            }
        }

        // The budget can also run out inside the final attempt; the timeout
        // code wins over whatever that attempt happened to fail with.
        if Self::budget_exhausted(started, budget) {
            return ProviderAttemptResult {
                outcome: Err(self.timeout_failure()),
                model: last_model,
                attempts,
            };
        }

        let failure = last_failure
            .unwrap_or_else(|| AttemptFailure::new(FailureKind::Unknown, "no attempts made"));
        ProviderAttemptResult {
            outcome: Err(failure),
            model: last_model,
            attempts,
        }
    }
}

/// Fetch an image URL and return its bytes as base64, for inlining masks and
/// reference images into provider requests.
///
/// # Errors
///
/// Returns the transport error, or an HTTP error for non-success statuses.
pub async fn fetch_image_base64(client: &Client, url: &str) -> Result<String, reqwest::Error> {
    let response = client.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    Ok(base64::engine::general_purpose::STANDARD.encode(&bytes))
}
