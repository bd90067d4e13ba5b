//! Service configuration.

use serde::Deserialize;
use std::path::Path;

/// One entry of the vehicle model catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    /// Stable slug used in requests, e.g. `"model-3"`.
    pub slug: String,
    /// Human-readable name used in prompts.
    pub display_name: String,
    /// Output aspect ratio for this model's wrap surface.
    pub aspect_ratio: String,
    /// URL of the wrap surface mask image, when one exists.
    #[serde(default)]
    pub mask_url: Option<String>,
}

/// Image provider connection and retry settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Provider API base URL.
    pub base_url: String,
    /// Provider API key.
    pub api_key: String,
    /// Primary image model.
    pub primary_model: String,
    /// Fallback image models, tried in order.
    pub fallback_models: Vec<String>,
    /// Text model used for the policy-retry prompt rewrite.
    pub optimizer_model: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// In-place retries per model on transient failures.
    pub max_retries: u32,
    /// Retry backoff base in milliseconds.
    pub retry_base_ms: u64,
    /// Retry backoff cap in milliseconds.
    pub retry_max_ms: u64,
    /// Hard wall-clock budget for one generation in milliseconds.
    pub max_total_ms: u64,
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/wrapgen").
    pub data_dir: String,

    /// HS256 secret for JWT validation.
    pub auth_secret: String,

    /// Admin API key for privileged endpoints (top-ups).
    pub admin_api_key: Option<String>,

    /// Credits reserved (and charged on success) per generation.
    pub generation_cost: i64,

    /// Maximum pending/processing tasks per user.
    pub in_flight_cap: usize,

    /// Age after which an in-flight task is considered stale.
    pub stale_after_seconds: i64,

    /// Per-user rate limit: max submissions per window.
    pub user_rate_max: u32,
    /// Per-user rate limit window in seconds.
    pub user_rate_window_seconds: u64,
    /// Per-origin rate limit: max submissions per window.
    pub origin_rate_max: u32,
    /// Per-origin rate limit window in seconds.
    pub origin_rate_window_seconds: u64,

    /// Polling hint returned with 202 responses, in seconds.
    pub retry_after_seconds: u32,

    /// Hosts (and their subdomains) allowed for reference image URLs.
    /// Inline `data:` references are always allowed.
    pub reference_image_hosts: Vec<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Provider settings.
    pub provider: ProviderSettings,

    /// Vehicle model catalog.
    pub models: Vec<ModelSpec>,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let models = std::env::var("MODEL_CATALOG_PATH")
            .ok()
            .and_then(|path| load_model_catalog(&path))
            .unwrap_or_else(default_model_catalog);

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/wrapgen".into()),
            auth_secret: std::env::var("AUTH_SECRET").unwrap_or_default(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            generation_cost: env_parsed("GENERATION_COST", 10),
            in_flight_cap: env_parsed("IN_FLIGHT_CAP", 2),
            stale_after_seconds: env_parsed("STALE_AFTER_SECONDS", 180),
            user_rate_max: env_parsed("USER_RATE_MAX", 6),
            user_rate_window_seconds: env_parsed("USER_RATE_WINDOW_SECONDS", 60),
            origin_rate_max: env_parsed("ORIGIN_RATE_MAX", 60),
            origin_rate_window_seconds: env_parsed("ORIGIN_RATE_WINDOW_SECONDS", 60),
            retry_after_seconds: env_parsed("RETRY_AFTER_SECONDS", 5),
            reference_image_hosts: std::env::var("REFERENCE_IMAGE_HOSTS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parsed("MAX_BODY_BYTES", 8 * 1024 * 1024),
            request_timeout_seconds: env_parsed("REQUEST_TIMEOUT_SECONDS", 30),
            provider: ProviderSettings {
                base_url: std::env::var("PROVIDER_BASE_URL")
                    .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
                api_key: std::env::var("PROVIDER_API_KEY").unwrap_or_default(),
                primary_model: std::env::var("PROVIDER_IMAGE_MODEL")
                    .unwrap_or_else(|_| "gemini-3-pro-image-preview".into()),
                fallback_models: std::env::var("PROVIDER_FALLBACK_MODELS")
                    .unwrap_or_else(|_| "gemini-2.5-flash-image".into())
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
                optimizer_model: std::env::var("PROVIDER_OPTIMIZER_MODEL")
                    .unwrap_or_else(|_| "gemini-1.5-flash".into()),
                timeout_ms: env_parsed("PROVIDER_TIMEOUT_MS", 60_000),
                max_retries: env_parsed("PROVIDER_MAX_RETRIES", 2),
                retry_base_ms: env_parsed("PROVIDER_RETRY_BASE_MS", 800),
                retry_max_ms: env_parsed("PROVIDER_RETRY_MAX_MS", 5_000),
                max_total_ms: env_parsed("PROVIDER_MAX_TOTAL_MS", 65_000),
            },
            models,
        }
    }

    /// Look up a catalog entry by slug.
    #[must_use]
    pub fn find_model(&self, slug: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.slug == slug)
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(fallback)
}

/// Built-in catalog used when no override file is configured.
fn default_model_catalog() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            slug: "model-3".into(),
            display_name: "Model 3".into(),
            aspect_ratio: "4:3".into(),
            mask_url: None,
        },
        ModelSpec {
            slug: "model-y".into(),
            display_name: "Model Y".into(),
            aspect_ratio: "4:3".into(),
            mask_url: None,
        },
    ]
}

/// Load the model catalog from a JSON file.
fn load_model_catalog(path: &str) -> Option<Vec<ModelSpec>> {
    let path = Path::new(path);
    let contents = std::fs::read_to_string(path)
        .map_err(|e| tracing::warn!(path = %path.display(), error = %e, "model catalog not readable"))
        .ok()?;
    let models: Vec<ModelSpec> = serde_json::from_str(&contents)
        .map_err(|e| tracing::warn!(path = %path.display(), error = %e, "model catalog malformed"))
        .ok()?;
    if models.is_empty() {
        tracing::warn!(path = %path.display(), "model catalog is empty, using defaults");
        return None;
    }
    tracing::info!(path = %path.display(), count = models.len(), "loaded model catalog");
    Some(models)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/wrapgen".into(),
            auth_secret: String::new(),
            admin_api_key: None,
            generation_cost: 10,
            in_flight_cap: 2,
            stale_after_seconds: 180,
            user_rate_max: 6,
            user_rate_window_seconds: 60,
            origin_rate_max: 60,
            origin_rate_window_seconds: 60,
            retry_after_seconds: 5,
            reference_image_hosts: Vec::new(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 8 * 1024 * 1024,
            request_timeout_seconds: 30,
            provider: ProviderSettings {
                base_url: "https://generativelanguage.googleapis.com".into(),
                api_key: String::new(),
                primary_model: "gemini-3-pro-image-preview".into(),
                fallback_models: vec!["gemini-2.5-flash-image".into()],
                optimizer_model: "gemini-1.5-flash".into(),
                timeout_ms: 60_000,
                max_retries: 2,
                retry_base_ms: 800,
                retry_max_ms: 5_000,
                max_total_ms: 65_000,
            },
            models: default_model_catalog(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_known_slugs() {
        let config = ServiceConfig::default();
        assert!(config.find_model("model-3").is_some());
        assert!(config.find_model("unknown-slug").is_none());
    }
}
