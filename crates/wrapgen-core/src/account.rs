//! Credit account records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// A user's credit account.
///
/// Mutated only by storage compound operations while the user's lock is held.
/// Invariant: `balance == total_earned - total_spent`, and `balance` is never
/// negative in steady state (reservation blocks overspending before
/// settlement).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccount {
    /// The account owner.
    pub user_id: UserId,

    /// Current spendable balance in credits.
    pub balance: i64,

    /// Lifetime credits earned (top-ups, adjustments up).
    pub total_earned: i64,

    /// Lifetime credits spent (settled generation charges).
    pub total_spent: i64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    /// Create a new empty account.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: 0,
            total_earned: 0,
            total_spent: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a credit (earning) to the account.
    pub fn credit(&mut self, amount: i64) {
        self.balance += amount;
        self.total_earned += amount;
        self.updated_at = Utc::now();
    }

    /// Apply a debit (spend) to the account.
    pub fn debit(&mut self, amount: i64) {
        self.balance -= amount;
        self.total_spent += amount;
        self.updated_at = Utc::now();
    }

    /// Reverse a previous debit (refund of a settled charge).
    ///
    /// Refunds restore both `balance` and `total_spent` so the
    /// `balance == total_earned - total_spent` invariant keeps holding.
    pub fn reverse_debit(&mut self, amount: i64) {
        self.balance += amount;
        self.total_spent -= amount;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservation_invariant() {
        let mut account = CreditAccount::new(UserId::generate());
        account.credit(100);
        account.debit(30);
        account.credit(50);
        account.reverse_debit(30);

        assert_eq!(account.balance, 150);
        assert_eq!(account.total_earned, 150);
        assert_eq!(account.total_spent, 0);
        assert_eq!(account.balance, account.total_earned - account.total_spent);
    }

    #[test]
    fn debit_then_refund_restores_balance() {
        let mut account = CreditAccount::new(UserId::generate());
        account.credit(30);
        account.debit(10);
        assert_eq!(account.balance, 20);
        assert_eq!(account.total_spent, 10);

        account.reverse_debit(10);
        assert_eq!(account.balance, 30);
        assert_eq!(account.total_spent, 0);
    }
}
