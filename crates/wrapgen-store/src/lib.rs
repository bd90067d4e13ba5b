//! `RocksDB` storage layer for the wrapgen generation pipeline.
//!
//! This crate provides durable storage for credit accounts, ledger entries,
//! generation tasks, and persisted wraps, using `RocksDB` with column
//! families for indexing.
//!
//! # Concurrency
//!
//! Balance-affecting compound operations (`reserve_task`, `settle_task`,
//! `refund_task`, `top_up`) serialize per user through an internal lock
//! registry, the embedded-store analogue of `SELECT ... FOR UPDATE` row
//! locking: reservation, settlement, and refund for one user never
//! interleave, while operations on different users run fully concurrently.
//! Each operation's writes go through a single `WriteBatch` so they land
//! atomically.
//!
//! # Example
//!
//! ```no_run
//! use wrapgen_store::{RocksStore, Store};
//! use wrapgen_core::UserId;
//!
//! let store = RocksStore::open("/tmp/wrapgen-db").unwrap();
//! let user_id = UserId::generate();
//! let balance = store.top_up(&user_id, 30, "starter pack").unwrap();
//! assert_eq!(balance, 30);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use wrapgen_core::{CreditAccount, LedgerEntry, Task, TaskId, TaskStep, UserId, Wrap, WrapId};

/// Outcome of a task reservation attempt.
#[derive(Debug)]
pub enum ReserveOutcome {
    /// A new task was created and its credits reserved.
    Created {
        /// The stored task.
        task: Task,
        /// Available balance after the reservation
        /// (`balance - all in-flight reservations`).
        remaining: i64,
    },
    /// The idempotency key matched an existing task; nothing was created.
    Duplicate {
        /// The previously created task.
        existing: Task,
    },
}

/// Outcome of a refund operation.
#[derive(Debug, Clone, Copy)]
pub struct RefundOutcome {
    /// Credits returned to the balance (0 if the task was never settled).
    pub refunded: i64,
    /// Balance after the refund.
    pub balance: i64,
    /// Whether the task had already been refunded (the call was a no-op).
    pub already_refunded: bool,
}

/// The storage trait defining all database operations.
///
/// Abstracts the storage layer so tests can substitute implementations.
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Get an account by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, user_id: &UserId) -> Result<Option<CreditAccount>>;

    /// Credit a user's account, creating it if absent, and write a `top_up`
    /// ledger entry. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn top_up(&self, user_id: &UserId, amount: i64, description: &str) -> Result<i64>;

    /// Available balance: `balance - sum(in-flight reservations)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn available_balance(&self, user_id: &UserId) -> Result<i64>;

    // =========================================================================
    // Task Operations
    // =========================================================================

    /// Get a task by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>>;

    /// Find a user's task by idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_task_by_idempotency_key(&self, user_id: &UserId, key: &str) -> Result<Option<Task>>;

    /// List a user's tasks, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_tasks_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>>;

    /// Count a user's in-flight (pending or processing) tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_in_flight(&self, user_id: &UserId) -> Result<usize>;

    /// Sum of credits reserved by a user's in-flight tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn reserved_in_flight(&self, user_id: &UserId) -> Result<i64>;

    /// Append a lifecycle step to a task's log.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the task doesn't exist.
    fn append_task_step(&self, task_id: &TaskId, step: TaskStep) -> Result<()>;

    /// Transition a task from pending to processing and stamp `started_at`.
    /// Returns the updated task.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTransition` if the task is not pending.
    fn mark_task_processing(&self, task_id: &TaskId) -> Result<Task>;

    /// Increment a task's provider attempt counter. Returns the new count.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the task doesn't exist.
    fn record_task_attempt(&self, task_id: &TaskId) -> Result<u32>;

    // =========================================================================
    // Compound Operations (per-user lock held throughout)
    // =========================================================================

    /// The submission-gate transaction: under the user's lock, check the
    /// idempotency key, the in-flight cap, and the available balance, then
    /// insert the task with its reservation in one atomic batch.
    ///
    /// # Errors
    ///
    /// - `StoreError::TooManyInFlight` when the cap is reached.
    /// - `StoreError::InsufficientCredits` when
    ///   `balance - reserved < task.credits_reserved`.
    fn reserve_task(&self, task: Task, in_flight_cap: usize) -> Result<ReserveOutcome>;

    /// Settle a successful task: debit the reserved credits, write the
    /// `generation_charge` entry, store the wrap (when given), and transition
    /// to `completed` (or `completed_unlinked` without a wrap). Idempotent:
    /// a second call returns the balance without re-charging.
    ///
    /// Returns the balance after settlement.
    ///
    /// # Errors
    ///
    /// - `StoreError::InsufficientCredits` if the balance no longer covers
    ///   the charge (reservation made this unreachable in normal operation).
    /// - `StoreError::InvalidTransition` if the task is terminal and unsettled.
    fn settle_task(&self, task_id: &TaskId, wrap: Option<Wrap>) -> Result<i64>;

    /// Mark a task failed with a stable error code and message. No-op when
    /// the task is already failed or terminal.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the task doesn't exist.
    fn fail_task(&self, task_id: &TaskId, code: &str, message: &str) -> Result<()>;

    /// Refund a failed task: credit back whatever was actually charged
    /// (0 if never settled), always write a `refund` ledger entry, and
    /// transition to `failed_refunded`. Idempotent: refunding an already
    /// refunded task is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTransition` when called on a completed task.
    fn refund_task(&self, task_id: &TaskId, reason: &str) -> Result<RefundOutcome>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// List a user's ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_ledger_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Sum of all ledger entry amounts for a user.
    ///
    /// Equals `balance - initial_balance`; with accounts starting at zero,
    /// equals the balance.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn ledger_sum(&self, user_id: &UserId) -> Result<i64>;

    // =========================================================================
    // Wrap Operations
    // =========================================================================

    /// Get a wrap by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_wrap(&self, wrap_id: &WrapId) -> Result<Option<Wrap>>;

    /// Find the wrap produced by a task, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_wrap_by_task(&self, task_id: &TaskId) -> Result<Option<Wrap>>;
}
