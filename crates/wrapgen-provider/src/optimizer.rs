//! One-shot prompt rewriting for policy retries.
//!
//! When a generation fails on `prompt_blocked`, `recitation_blocked`, or
//! `no_image_payload`, the worker asks a fast text model to rewrite the
//! prompt once, keeping the visual intent, and retries with the rewritten
//! prompt. The optimizer is best-effort: any failure here reports
//! `changed: false` and the caller proceeds without a retry.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::parse::AttemptFailure;
use crate::types::GenerateContentResponse;

/// Outcome of a rewrite attempt.
#[derive(Debug, Clone)]
pub struct OptimizerOutcome {
    /// Whether the prompt actually changed. A retry is only worthwhile when
    /// it did.
    pub changed: bool,
    /// The prompt to use (original when unchanged).
    pub prompt: String,
}

/// Text-model client that rewrites blocked prompts.
#[derive(Debug, Clone)]
pub struct PromptOptimizer {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct RewriteRequest {
    contents: Vec<RewriteContent>,
    #[serde(rename = "systemInstruction")]
    system_instruction: RewriteContent,
}

#[derive(Serialize)]
struct RewriteContent {
    parts: Vec<RewritePart>,
}

#[derive(Serialize)]
struct RewritePart {
    text: String,
}

impl PromptOptimizer {
    /// Build an optimizer client.
    ///
    /// # Errors
    ///
    /// Returns the underlying builder error if the TLS backend cannot be
    /// initialized.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_ms: u64,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn system_instruction(prompt: &str, failure: &AttemptFailure) -> String {
        let reason = failure
            .diagnostics
            .prompt_block_reason
            .clone()
            .unwrap_or_else(|| failure.diagnostics.finish_reasons.join(","));
        let reason = if reason.is_empty() {
            failure.kind.as_code().to_uppercase()
        } else {
            reason
        };
        let detail = failure.diagnostics.finish_messages.join(" ");

        format!(
            "You are a prompt engineering expert for automotive design AI.\n\
             The previous generation attempt failed due to a safety, policy, or logic check.\n\
             Reason: \"{reason}\". Detail: \"{detail}\".\n\
             Original Prompt: \"{prompt}\".\n\n\
             Your goal is to REWRITE the prompt to be safer, simpler, and compliant, \
             while keeping the core visual intent.\n\
             - Remove any violence, gore, explicit, political, or copyright-sensitive keywords.\n\
             - Simplify complex descriptions.\n\
             - Focus on visual aesthetics (color, texture, style).\n\
             - Output ONLY the rewritten English prompt. Do not output JSON or markdown."
        )
    }

    /// Rewrite a blocked prompt. Best-effort: transport and parse failures
    /// report `changed: false` with the original prompt.
    pub async fn rewrite(&self, prompt: &str, failure: &AttemptFailure) -> OptimizerOutcome {
        let unchanged = OptimizerOutcome {
            changed: false,
            prompt: prompt.to_string(),
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = RewriteRequest {
            contents: vec![RewriteContent {
                parts: vec![RewritePart {
                    text: format!("Please rewrite this prompt to pass safety checks: {prompt}"),
                }],
            }],
            system_instruction: RewriteContent {
                parts: vec![RewritePart {
                    text: Self::system_instruction(prompt, failure),
                }],
            },
        };

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await;

        let parsed: GenerateContentResponse = match response {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(error = %e, "prompt optimizer returned malformed body");
                    return unchanged;
                }
            },
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "prompt optimizer call failed");
                return unchanged;
            }
            Err(e) => {
                tracing::warn!(error = %e, "prompt optimizer call failed");
                return unchanged;
            }
        };

        let rewritten = parsed
            .candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| &c.parts)
            .filter_map(|p| p.text.as_deref())
            .map(str::trim)
            .find(|t| !t.is_empty());

        match rewritten {
            Some(text) if text != prompt.trim() => OptimizerOutcome {
                changed: true,
                prompt: text.to_string(),
            },
            Some(_) => {
                tracing::info!("prompt optimizer returned the same prompt");
                unchanged
            }
            None => unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::FailureKind;

    #[test]
    fn instruction_includes_reason_and_prompt() {
        let mut failure = AttemptFailure::new(FailureKind::PromptBlocked, "blocked");
        failure.diagnostics.prompt_block_reason = Some("SAFETY".into());
        let text = PromptOptimizer::system_instruction("dragon fire", &failure);
        assert!(text.contains("\"SAFETY\""));
        assert!(text.contains("dragon fire"));
    }

    #[test]
    fn instruction_falls_back_to_kind_code() {
        let failure = AttemptFailure::new(FailureKind::NoImagePayload, "nothing");
        let text = PromptOptimizer::system_instruction("p", &failure);
        assert!(text.contains("NO_IMAGE_PAYLOAD"));
    }
}
