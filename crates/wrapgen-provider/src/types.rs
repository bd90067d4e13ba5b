//! Request and wire types for the `generateContent` API.

use serde::{Deserialize, Serialize};

use crate::parse::AttemptFailure;

/// An image input, either referenced by URL or carried inline.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// A publicly fetchable URL, sent as a `fileData` part.
    Url(String),
    /// Inline base64 data, sent as an `inlineData` part.
    Inline {
        /// MIME type, e.g. `image/png`.
        mime: String,
        /// Raw base64 payload (no `data:` prefix).
        base64: String,
    },
}

impl ImageInput {
    /// MIME type guessed from a URL's extension (`image/jpeg` fallback).
    #[must_use]
    pub fn mime_for_url(url: &str) -> &'static str {
        let lower = url.to_lowercase();
        if lower.contains(".png") {
            "image/png"
        } else if lower.contains(".webp") {
            "image/webp"
        } else if lower.contains(".gif") {
            "image/gif"
        } else {
            "image/jpeg"
        }
    }

    fn to_part(&self) -> Part {
        match self {
            Self::Url(url) => Part::File {
                file_data: FileData {
                    mime_type: Self::mime_for_url(url).to_string(),
                    file_uri: url.clone(),
                },
            },
            Self::Inline { mime, base64 } => Part::Inline {
                inline_data: InlineData {
                    mime_type: mime.clone(),
                    data: base64.clone(),
                },
            },
        }
    }
}

/// One generation request, fully assembled by the caller.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The full prompt text to send.
    pub prompt: String,
    /// Aspect ratio for the output image, e.g. `"4:3"`.
    pub aspect_ratio: String,
    /// The surface mask image, sent before the prompt text.
    pub mask: Option<ImageInput>,
    /// Reference images, sent after the prompt text.
    pub references: Vec<ImageInput>,
}

impl GenerationRequest {
    /// Build the wire request body.
    ///
    /// Part ordering is mask, then prompt text, then references; the model
    /// treats the first image as the editing canvas.
    #[must_use]
    pub fn to_wire(&self) -> GenerateContentRequest {
        let mut parts = Vec::with_capacity(2 + self.references.len());
        if let Some(mask) = &self.mask {
            parts.push(mask.to_part());
        }
        parts.push(Part::Text {
            text: self.prompt.trim().to_string(),
        });
        parts.extend(self.references.iter().map(ImageInput::to_part));

        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE".to_string()],
                candidate_count: 1,
                image_config: ImageConfig {
                    aspect_ratio: self.aspect_ratio.clone(),
                },
            },
        }
    }
}

/// A successfully generated image.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    /// MIME type reported by the model.
    pub mime_type: String,
    /// Base64-encoded image bytes.
    pub base64: String,
}

impl ImagePayload {
    /// Render as a `data:` URL.
    #[must_use]
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// The outcome of one `generate` call, including everything the client tried.
#[derive(Debug)]
pub struct ProviderAttemptResult {
    /// The image, or the classified failure of the last attempt.
    pub outcome: Result<ImagePayload, AttemptFailure>,
    /// The model that produced the outcome (None when nothing was reached).
    pub model: Option<String>,
    /// Total HTTP attempts made across all models and retries.
    pub attempts: u32,
}

// --- Wire request -----------------------------------------------------------

/// Top-level `generateContent` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// Conversation contents (a single user turn for image generation).
    pub contents: Vec<Content>,
    /// Generation parameters.
    pub generation_config: GenerationConfig,
}

/// One conversation turn.
#[derive(Debug, Serialize)]
pub struct Content {
    /// Role, always `"user"` here.
    pub role: String,
    /// Ordered content parts.
    pub parts: Vec<Part>,
}

/// One content part: text, inline image data, or a fetchable file URL.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Part {
    /// Prompt text.
    Text {
        /// The text.
        text: String,
    },
    /// Inline base64 image.
    Inline {
        /// The inline payload.
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    /// URL the model fetches itself.
    File {
        /// The file reference.
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

/// Inline base64 image data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// MIME type.
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

/// A model-fetched file reference.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    /// MIME type.
    pub mime_type: String,
    /// The URL.
    pub file_uri: String,
}

/// Generation parameters (image-only output, single candidate).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Modality enum values are uppercase in the REST payload.
    pub response_modalities: Vec<String>,
    /// Always 1.
    pub candidate_count: u32,
    /// Image-specific parameters.
    pub image_config: ImageConfig,
}

/// Image output parameters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    /// Output aspect ratio, e.g. `"4:3"`.
    pub aspect_ratio: String,
}

// --- Wire response ----------------------------------------------------------

/// Top-level `generateContent` response body.
///
/// Also deserialized from error-status bodies, which may carry candidate and
/// prompt-feedback details alongside the `error` object.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateContentResponse {
    /// Response candidates.
    pub candidates: Vec<Candidate>,
    /// Prompt-level feedback (block reason).
    pub prompt_feedback: Option<PromptFeedback>,
    /// Provider-assigned response ID.
    pub response_id: Option<String>,
    /// Concrete model version that served the request.
    pub model_version: Option<String>,
    /// Error object present on error-status bodies.
    pub error: Option<WireError>,
}

/// One response candidate.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Candidate {
    /// Candidate content parts.
    pub content: Option<CandidateContent>,
    /// Why the candidate finished.
    pub finish_reason: Option<String>,
    /// Free-form detail accompanying the finish reason.
    pub finish_message: Option<String>,
}

/// Candidate content wrapper.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CandidateContent {
    /// Ordered parts.
    pub parts: Vec<ResponsePart>,
}

/// One response part. Fields are optional; exactly one is normally set.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponsePart {
    /// Inline image payload. The API has used both spellings.
    #[serde(rename = "inlineData", alias = "inline_data")]
    pub inline_data: Option<InlineData>,
    /// Text payload.
    pub text: Option<String>,
}

/// Prompt-level feedback.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptFeedback {
    /// Block reason, e.g. `SAFETY`.
    pub block_reason: Option<String>,
}

/// Error object on error-status bodies.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireError {
    /// Human-readable message.
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_request_orders_mask_first() {
        let req = GenerationRequest {
            prompt: "  glacier blue fade  ".into(),
            aspect_ratio: "4:3".into(),
            mask: Some(ImageInput::Url("https://cdn.example.com/mask.png".into())),
            references: vec![ImageInput::Inline {
                mime: "image/jpeg".into(),
                base64: "QUJD".into(),
            }],
        };

        let value = serde_json::to_value(req.to_wire()).unwrap();
        let parts = &value["contents"][0]["parts"];
        assert!(parts[0]["fileData"]["fileUri"]
            .as_str()
            .unwrap()
            .contains("mask.png"));
        assert_eq!(parts[0]["fileData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["text"], "glacier blue fade");
        assert_eq!(parts[2]["inlineData"]["data"], "QUJD");

        let config = &value["generationConfig"];
        assert_eq!(config["responseModalities"][0], "IMAGE");
        assert_eq!(config["candidateCount"], 1);
        assert_eq!(config["imageConfig"]["aspectRatio"], "4:3");
    }

    #[test]
    fn mime_guessed_from_url() {
        assert_eq!(ImageInput::mime_for_url("https://x/y.png?v=1"), "image/png");
        assert_eq!(ImageInput::mime_for_url("https://x/y.webp"), "image/webp");
        assert_eq!(ImageInput::mime_for_url("https://x/y"), "image/jpeg");
    }

    #[test]
    fn response_accepts_both_inline_data_spellings() {
        let camel: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"QQ=="}}]}}]}"#,
        )
        .unwrap();
        let snake: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"inline_data":{"mimeType":"image/png","data":"QQ=="}}]}}]}"#,
        )
        .unwrap();
        for resp in [camel, snake] {
            let part = &resp.candidates[0].content.as_ref().unwrap().parts[0];
            assert_eq!(part.inline_data.as_ref().unwrap().data, "QQ==");
        }
    }

    #[test]
    fn data_url_format() {
        let payload = ImagePayload {
            mime_type: "image/png".into(),
            base64: "QQ==".into(),
        };
        assert_eq!(payload.data_url(), "data:image/png;base64,QQ==");
    }
}
