//! Wrapgen HTTP API Service.
//!
//! This crate provides the HTTP API for the wrap generation pipeline:
//!
//! - Wrap generation submission (credit-reserved, idempotent)
//! - Task status polling
//! - Credit balance and ledger
//! - Admin top-ups
//!
//! # Authentication
//!
//! End-user requests carry an HS256 JWT bearer token; admin endpoints
//! require the `X-Admin-Key` header.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Some handlers need async for consistency

pub mod artifacts;
pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod ratelimit;
pub mod reclaim;
pub mod routes;
pub mod state;
pub mod worker;

pub use artifacts::{ArtifactSink, DataUrlSink, SinkError};
pub use config::{ModelSpec, ProviderSettings, ServiceConfig};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
