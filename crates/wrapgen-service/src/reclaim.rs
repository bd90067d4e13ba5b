//! Stale task reclamation.
//!
//! A task left pending or processing past the configured threshold means its
//! worker died (process restart, panic, lost spawn). Reclamation is
//! opportunistic: it runs when an idempotent resubmission trips over the
//! stale task, force-fails it, and refunds the reservation so the user can
//! try again.

use chrono::{DateTime, Utc};

use wrapgen_core::{StepKind, Task, TaskStep};
use wrapgen_store::{RefundOutcome, Store, StoreError};

/// Whether a task qualifies for reclamation.
#[must_use]
pub fn is_stale(task: &Task, stale_after_seconds: i64, now: DateTime<Utc>) -> bool {
    task.is_in_flight() && task.age_seconds(now) > stale_after_seconds
}

/// Force-fail and refund a stale in-flight task.
///
/// # Errors
///
/// Returns an error if the store rejects the refund.
pub fn reclaim_stale(store: &dyn Store, task: &Task) -> Result<RefundOutcome, StoreError> {
    store.append_task_step(
        &task.id,
        TaskStep::with_detail(
            StepKind::Reclaimed,
            format!("stale in status {} after {}s", task.status, task.age_seconds(Utc::now())),
        ),
    )?;
    let outcome = store.refund_task(&task.id, "stale task reclaimed")?;
    tracing::warn!(
        task_id = %task.id,
        user_id = %task.user_id,
        refunded = outcome.refunded,
        "reclaimed stale task"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wrapgen_core::{TaskStatus, UserId};

    fn task() -> Task {
        Task::new(UserId::generate(), "p".into(), "model-3".into(), vec![], 10, None)
    }

    #[test]
    fn fresh_task_is_not_stale() {
        let t = task();
        assert!(!is_stale(&t, 180, Utc::now()));
    }

    #[test]
    fn old_in_flight_task_is_stale() {
        let t = task();
        let later = t.created_at + chrono::Duration::seconds(181);
        assert!(is_stale(&t, 180, later));
    }

    #[test]
    fn terminal_task_is_never_stale() {
        let mut t = task();
        t.status = TaskStatus::FailedRefunded;
        let later = t.created_at + chrono::Duration::seconds(10_000);
        assert!(!is_stale(&t, 180, later));
    }

    #[test]
    fn threshold_is_exclusive() {
        let t = task();
        let edge = t.created_at + chrono::Duration::seconds(180);
        assert!(!is_stale(&t, 180, edge));
    }
}
