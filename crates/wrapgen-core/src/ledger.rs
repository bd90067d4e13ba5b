//! Ledger entry types.
//!
//! Every balance-affecting event writes an immutable ledger entry. Summing a
//! user's entries reproduces their balance relative to the initial (zero)
//! balance, which makes the ledger the authoritative balance history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{LedgerEntryId, TaskId, UserId};

/// Kind of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    /// Debit for a successfully settled generation.
    GenerationCharge,
    /// Credit reversing a generation charge (or a 0-amount audit marker for
    /// a failed task that was never charged).
    Refund,
    /// Credit from a purchase.
    TopUp,
    /// Manual operator adjustment (either sign).
    Adjustment,
}

/// An immutable record of one balance-affecting event.
///
/// Entries use ULIDs for time-ordered IDs; `amount` is signed (positive =
/// credit, negative = debit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (ULID for time-ordering).
    pub id: LedgerEntryId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// The generation task this entry relates to, if any.
    pub task_id: Option<TaskId>,

    /// Signed amount in credits.
    pub amount: i64,

    /// Kind of entry.
    pub entry_type: LedgerEntryType,

    /// Human-readable description.
    pub description: String,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create a generation charge (debit) for a settled task.
    #[must_use]
    pub fn generation_charge(
        user_id: UserId,
        task_id: TaskId,
        amount: i64,
        description: String,
    ) -> Self {
        Self {
            id: LedgerEntryId::generate(),
            user_id,
            task_id: Some(task_id),
            amount: -amount.abs(),
            entry_type: LedgerEntryType::GenerationCharge,
            description,
            created_at: Utc::now(),
        }
    }

    /// Create a refund entry for a failed task.
    ///
    /// The amount may be 0 when the task was never settled; the entry is
    /// still written to preserve a complete audit trail of terminal failures.
    #[must_use]
    pub fn refund(user_id: UserId, task_id: TaskId, amount: i64, reason: String) -> Self {
        Self {
            id: LedgerEntryId::generate(),
            user_id,
            task_id: Some(task_id),
            amount: amount.abs(),
            entry_type: LedgerEntryType::Refund,
            description: reason,
            created_at: Utc::now(),
        }
    }

    /// Create a top-up (purchase) entry.
    #[must_use]
    pub fn top_up(user_id: UserId, amount: i64, description: String) -> Self {
        Self {
            id: LedgerEntryId::generate(),
            user_id,
            task_id: None,
            amount: amount.abs(),
            entry_type: LedgerEntryType::TopUp,
            description,
            created_at: Utc::now(),
        }
    }
}
