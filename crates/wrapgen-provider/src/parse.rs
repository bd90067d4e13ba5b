//! Response classification.
//!
//! Every provider outcome collapses into a [`FailureKind`] (or an image).
//! Classification is pure and fully testable offline: it looks only at the
//! HTTP status and the decoded response body.

use crate::types::{GenerateContentResponse, ImagePayload};

/// Prompt-level block reasons that mean the prompt itself was rejected.
const PROMPT_BLOCKED_REASONS: &[&str] =
    &["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "IMAGE_SAFETY"];

/// Candidate finish reasons indicating a content-policy rejection.
const FINISH_POLICY_REASONS: &[&str] = &[
    "SAFETY",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
    "IMAGE_PROHIBITED_CONTENT",
];

/// Candidate finish reasons indicating a copyright/recitation rejection.
const FINISH_RECITATION_REASONS: &[&str] = &["RECITATION", "IMAGE_RECITATION"];

/// Candidate finish reasons worth retrying on another model.
const FINISH_RETRYABLE_REASONS: &[&str] = &["OTHER", "IMAGE_OTHER", "NO_IMAGE"];

/// Exhaustive failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The prompt (or an input image) was rejected on policy grounds.
    PromptBlocked,
    /// The output tripped copyright/recitation limits.
    RecitationBlocked,
    /// The model answered but produced no image (text-only or empty).
    NoImagePayload,
    /// The total wall-clock budget was exceeded.
    Timeout,
    /// The provider rate-limited us (HTTP 429).
    RateLimited,
    /// Any other provider-reported error.
    ApiError,
    /// Transport-level or unclassifiable failure.
    Unknown,
}

impl FailureKind {
    /// Stable error-code string, shared with the HTTP error taxonomy.
    #[must_use]
    pub fn as_code(self) -> &'static str {
        match self {
            Self::PromptBlocked => "prompt_blocked",
            Self::RecitationBlocked => "recitation_blocked",
            Self::NoImagePayload => "no_image_payload",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ApiError => "api_error",
            Self::Unknown => "unknown_error",
        }
    }

    /// Default retry policy for the kind. Policy rejections and timeouts are
    /// final; everything else may be worth another model or attempt.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        match self {
            Self::PromptBlocked | Self::RecitationBlocked | Self::Timeout | Self::ApiError => false,
            Self::NoImagePayload | Self::RateLimited | Self::Unknown => true,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Diagnostics carried alongside every classified failure.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Candidate finish reasons, uppercased.
    pub finish_reasons: Vec<String>,
    /// Candidate finish messages.
    pub finish_messages: Vec<String>,
    /// Prompt-level block reason, uppercased.
    pub prompt_block_reason: Option<String>,
    /// Provider response ID.
    pub response_id: Option<String>,
    /// Concrete model version.
    pub model_version: Option<String>,
}

impl Diagnostics {
    fn from_response(resp: &GenerateContentResponse) -> Self {
        Self {
            finish_reasons: resp
                .candidates
                .iter()
                .filter_map(|c| c.finish_reason.as_deref())
                .map(str::to_uppercase)
                .collect(),
            finish_messages: resp
                .candidates
                .iter()
                .filter_map(|c| c.finish_message.clone())
                .filter(|m| !m.trim().is_empty())
                .collect(),
            prompt_block_reason: resp
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason.as_deref())
                .map(str::to_uppercase),
            response_id: resp.response_id.clone(),
            model_version: resp.model_version.clone(),
        }
    }
}

/// A classified failed attempt.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    /// What went wrong.
    pub kind: FailureKind,
    /// Whether this specific failure is worth retrying. Usually
    /// `kind.is_retryable()`, but HTTP 408/5xx override `ApiError` to
    /// retryable.
    pub retryable: bool,
    /// Human-readable message (logged server-side, never echoed verbatim).
    pub message: String,
    /// Provider diagnostics.
    pub diagnostics: Diagnostics,
}

impl AttemptFailure {
    /// A failure with the kind's default retryability and no diagnostics.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
            message: message.into(),
            diagnostics: Diagnostics::default(),
        }
    }
}

fn contains(set: &[&str], value: &str) -> bool {
    set.iter().any(|s| *s == value)
}

/// Classify a 2xx response body: extract the image or explain its absence.
#[must_use]
pub fn classify_response(resp: &GenerateContentResponse) -> Result<ImagePayload, AttemptFailure> {
    for candidate in &resp.candidates {
        let parts = candidate.content.as_ref().map(|c| c.parts.as_slice());
        for part in parts.unwrap_or_default() {
            if let Some(inline) = &part.inline_data {
                if !inline.data.is_empty() {
                    return Ok(ImagePayload {
                        mime_type: inline.mime_type.clone(),
                        base64: inline.data.clone(),
                    });
                }
            }
        }
    }

    let diagnostics = Diagnostics::from_response(resp);
    let finish: Vec<&str> = diagnostics.finish_reasons.iter().map(String::as_str).collect();

    if let Some(reason) = &diagnostics.prompt_block_reason {
        return Err(AttemptFailure {
            kind: FailureKind::PromptBlocked,
            retryable: false,
            message: format!("prompt blocked: {reason}"),
            diagnostics,
        });
    }
    if finish.iter().any(|r| contains(FINISH_POLICY_REASONS, r)) {
        return Err(AttemptFailure {
            kind: FailureKind::PromptBlocked,
            retryable: false,
            message: format!("content policy finish: {}", finish.join(",")),
            diagnostics,
        });
    }
    if finish.iter().any(|r| contains(FINISH_RECITATION_REASONS, r)) {
        return Err(AttemptFailure {
            kind: FailureKind::RecitationBlocked,
            retryable: false,
            message: format!("recitation finish: {}", finish.join(",")),
            diagnostics,
        });
    }

    // A text-only answer is a soft failure; another model may comply.
    let text = resp
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| &c.parts)
        .filter_map(|p| p.text.as_deref())
        .find(|t| !t.trim().is_empty());
    if let Some(text) = text {
        let snippet: String = text.trim().chars().take(200).collect();
        return Err(AttemptFailure {
            kind: FailureKind::NoImagePayload,
            retryable: true,
            message: format!("model returned text instead of an image: {snippet}"),
            diagnostics,
        });
    }

    let retryable =
        finish.is_empty() || finish.iter().any(|r| contains(FINISH_RETRYABLE_REASONS, r));
    Err(AttemptFailure {
        kind: FailureKind::NoImagePayload,
        retryable,
        message: if finish.is_empty() {
            "response contained no image payload".to_string()
        } else {
            format!("no image payload, finish: {}", finish.join(","))
        },
        diagnostics,
    })
}

/// Classify a non-2xx response.
///
/// Error bodies sometimes carry prompt feedback; a policy block wins over the
/// status code.
#[must_use]
pub fn classify_http_error(status: u16, body: &str) -> AttemptFailure {
    let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap_or_default();
    let diagnostics = Diagnostics::from_response(&parsed);

    if let Some(reason) = &diagnostics.prompt_block_reason {
        if contains(PROMPT_BLOCKED_REASONS, reason) {
            return AttemptFailure {
                kind: FailureKind::PromptBlocked,
                retryable: false,
                message: format!("prompt blocked: {reason}"),
                diagnostics,
            };
        }
    }

    if status == 429 {
        return AttemptFailure {
            kind: FailureKind::RateLimited,
            retryable: true,
            message: "provider rate limit (HTTP 429)".to_string(),
            diagnostics,
        };
    }

    let message = parsed
        .error
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.chars().take(600).collect());

    if status == 408 || status >= 500 {
        return AttemptFailure {
            kind: FailureKind::ApiError,
            retryable: true,
            message: format!("transient provider error (HTTP {status}): {message}"),
            diagnostics,
        };
    }

    AttemptFailure {
        kind: FailureKind::ApiError,
        retryable: false,
        message: format!("provider error (HTTP {status}): {message}"),
        diagnostics,
    }
}

/// Whether an HTTP status is worth an in-place retry before switching models.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 429 | 500 | 502 | 503 | 504)
}
