//! Application state.

use std::sync::Arc;
use std::time::Duration;

use wrapgen_provider::{PromptOptimizer, ProviderClient, ProviderConfig};
use wrapgen_store::RocksStore;

use crate::artifacts::{ArtifactSink, DataUrlSink};
use crate::config::ServiceConfig;
use crate::ratelimit::FixedWindowLimiter;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<RocksStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Image generation provider client.
    pub provider: Arc<ProviderClient>,

    /// Prompt optimizer for the one-shot policy retry.
    pub optimizer: Arc<PromptOptimizer>,

    /// Artifact persistence sink.
    pub artifacts: Arc<dyn ArtifactSink>,

    /// Per-user submission rate limiter.
    pub user_limiter: Arc<FixedWindowLimiter>,

    /// Per-origin submission rate limiter.
    pub origin_limiter: Arc<FixedWindowLimiter>,
}

impl AppState {
    /// Create a new application state with the default artifact sink.
    ///
    /// # Errors
    ///
    /// Returns the underlying builder error if an HTTP client cannot be
    /// constructed.
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig) -> Result<Self, reqwest::Error> {
        Self::with_artifact_sink(store, config, Arc::new(DataUrlSink))
    }

    /// Create application state with a custom artifact sink.
    ///
    /// # Errors
    ///
    /// Returns the underlying builder error if an HTTP client cannot be
    /// constructed.
    pub fn with_artifact_sink(
        store: Arc<RocksStore>,
        config: ServiceConfig,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Result<Self, reqwest::Error> {
        let provider = ProviderClient::new(ProviderConfig {
            base_url: config.provider.base_url.clone(),
            api_key: config.provider.api_key.clone(),
            primary_model: config.provider.primary_model.clone(),
            fallback_models: config.provider.fallback_models.clone(),
            timeout_ms: config.provider.timeout_ms,
            max_retries: config.provider.max_retries,
            retry_base_ms: config.provider.retry_base_ms,
            retry_max_ms: config.provider.retry_max_ms,
            max_total_ms: config.provider.max_total_ms,
        })?;

        let optimizer = PromptOptimizer::new(
            config.provider.base_url.clone(),
            config.provider.api_key.clone(),
            config.provider.optimizer_model.clone(),
            config.provider.timeout_ms,
        )?;

        let user_limiter = FixedWindowLimiter::new(
            config.user_rate_max,
            Duration::from_secs(config.user_rate_window_seconds),
        );
        let origin_limiter = FixedWindowLimiter::new(
            config.origin_rate_max,
            Duration::from_secs(config.origin_rate_window_seconds),
        );

        Ok(Self {
            store,
            config,
            provider: Arc::new(provider),
            optimizer: Arc::new(optimizer),
            artifacts,
            user_limiter: Arc::new(user_limiter),
            origin_limiter: Arc::new(origin_limiter),
        })
    }
}
