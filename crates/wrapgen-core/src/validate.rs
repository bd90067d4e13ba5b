//! Submission request validation.
//!
//! Pure checks shared by the submission gate; no I/O. Reference URLs must be
//! allow-listed so the provider is never handed an arbitrary fetch target.

use crate::error::{CoreError, Result};

/// Minimum prompt length in characters.
pub const MIN_PROMPT_CHARS: usize = 3;

/// Maximum prompt length in characters.
pub const MAX_PROMPT_CHARS: usize = 400;

/// Maximum number of reference images per submission.
pub const MAX_REFERENCE_IMAGES: usize = 3;

/// Minimum idempotency key length.
pub const MIN_IDEMPOTENCY_KEY_CHARS: usize = 16;

/// Maximum idempotency key length.
pub const MAX_IDEMPOTENCY_KEY_CHARS: usize = 128;

/// Validate a user prompt (3-400 characters after trimming).
///
/// # Errors
///
/// Returns `CoreError::InvalidPrompt` when the trimmed prompt is out of range.
pub fn validate_prompt(prompt: &str) -> Result<()> {
    let len = prompt.trim().chars().count();
    if len < MIN_PROMPT_CHARS {
        return Err(CoreError::InvalidPrompt(format!(
            "too short: {len} chars (min {MIN_PROMPT_CHARS})"
        )));
    }
    if len > MAX_PROMPT_CHARS {
        return Err(CoreError::InvalidPrompt(format!(
            "too long: {len} chars (max {MAX_PROMPT_CHARS})"
        )));
    }
    Ok(())
}

/// Validate an idempotency key: 16-128 characters from `[A-Za-z0-9_-]`.
///
/// # Errors
///
/// Returns `CoreError::InvalidIdempotencyKey` on length or alphabet violation.
pub fn validate_idempotency_key(key: &str) -> Result<()> {
    let len = key.len();
    if !(MIN_IDEMPOTENCY_KEY_CHARS..=MAX_IDEMPOTENCY_KEY_CHARS).contains(&len) {
        return Err(CoreError::InvalidIdempotencyKey(format!(
            "length {len} outside {MIN_IDEMPOTENCY_KEY_CHARS}-{MAX_IDEMPOTENCY_KEY_CHARS}"
        )));
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(CoreError::InvalidIdempotencyKey(
            "characters outside [A-Za-z0-9_-]".into(),
        ));
    }
    Ok(())
}

/// Validate reference image inputs against count and allow-list constraints.
///
/// Each input must be inline data (`data:` URI) or an `https` URL whose host
/// is in `allowed_hosts`.
///
/// # Errors
///
/// Returns `CoreError::TooManyReferenceImages` or
/// `CoreError::InvalidReferenceImage`.
pub fn validate_reference_images(references: &[String], allowed_hosts: &[String]) -> Result<()> {
    if references.len() > MAX_REFERENCE_IMAGES {
        return Err(CoreError::TooManyReferenceImages {
            count: references.len(),
            max: MAX_REFERENCE_IMAGES,
        });
    }

    for reference in references {
        if reference.starts_with("data:") {
            continue;
        }
        if !is_allowed_url(reference, allowed_hosts) {
            return Err(CoreError::InvalidReferenceImage(truncate(reference, 80)));
        }
    }

    Ok(())
}

/// Check an `https` URL against the host allow-list.
fn is_allowed_url(input: &str, allowed_hosts: &[String]) -> bool {
    let Some(rest) = input.strip_prefix("https://") else {
        return false;
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return false;
    }
    allowed_hosts
        .iter()
        .any(|allowed| host == allowed || host.ends_with(&format!(".{allowed}")))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i < max)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}...", &s[..cut])
    }
}
