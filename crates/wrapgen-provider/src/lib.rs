//! Image generation provider client.
//!
//! This crate wraps the upstream image model's `generateContent` REST API:
//! request assembly (mask-first part ordering, inline or URL image inputs),
//! model fallback, bounded retry with a hard wall-clock budget, and an
//! exhaustive failure classification that downstream code can act on without
//! ever inspecting raw provider payloads.
//!
//! The client is storage-agnostic: it takes a [`GenerationRequest`] and
//! returns a [`ProviderAttemptResult`], nothing else.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod optimizer;
pub mod parse;
pub mod types;

pub use client::{fetch_image_base64, ProviderClient, ProviderConfig};
pub use optimizer::{OptimizerOutcome, PromptOptimizer};
pub use parse::{AttemptFailure, Diagnostics, FailureKind};
pub use types::{GenerationRequest, ImageInput, ImagePayload, ProviderAttemptResult};
