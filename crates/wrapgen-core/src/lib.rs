//! Core types for the wrapgen generation pipeline.
//!
//! This crate provides the foundational types shared by the storage layer,
//! the provider client, and the HTTP service:
//!
//! - **Identifiers**: `UserId`, `WrapId`, `TaskId`, `LedgerEntryId`
//! - **Accounts**: `CreditAccount`
//! - **Ledger**: `LedgerEntry`, `LedgerEntryType`
//! - **Tasks**: `Task`, `TaskStatus`, `TaskStep`, `StepKind`
//! - **Validation**: submission request checks
//!
//! # Credits
//!
//! Credits are whole units stored as `i64`. One generation reserves a fixed
//! number of credits at submission; the ledger is charged only when the
//! generation succeeds, and refunded otherwise. For every user,
//! `balance == total_earned - total_spent` at all times.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod task;
pub mod validate;
pub mod wrap;

pub use account::CreditAccount;
pub use error::{CoreError, Result};
pub use ids::{IdError, LedgerEntryId, TaskId, UserId, WrapId};
pub use ledger::{LedgerEntry, LedgerEntryType};
pub use task::{StepKind, Task, TaskStatus, TaskStep};
pub use validate::{
    validate_idempotency_key, validate_prompt, validate_reference_images, MAX_PROMPT_CHARS,
    MAX_REFERENCE_IMAGES, MIN_PROMPT_CHARS,
};
pub use wrap::Wrap;
