//! Generation task lifecycle.
//!
//! A `Task` is the durable record of one generation attempt. Its status
//! machine is:
//!
//! ```text
//! pending -> processing -> completed
//!                       -> completed_unlinked
//!                       -> failed -> failed_refunded
//! ```
//!
//! `completed`, `completed_unlinked`, and `failed_refunded` are terminal.
//! `completed_unlinked` is the explicit state for "artifact produced and
//! settled, but the wrap record could not be persisted".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, UserId, WrapId};

/// Status of a generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created and credits reserved; not yet picked up by a worker.
    Pending,
    /// A worker is driving the task.
    Processing,
    /// Artifact produced, settled, and linked to a wrap record.
    Completed,
    /// Artifact produced and settled, but the wrap record failed to persist.
    CompletedUnlinked,
    /// Generation failed; refund not yet recorded.
    Failed,
    /// Generation failed and the refund ledger entry has landed.
    FailedRefunded,
}

impl TaskStatus {
    /// Whether the task still counts against the user's in-flight cap and
    /// reserved credits.
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Whether no further transition is allowed out of this status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedUnlinked | Self::FailedRefunded
        )
    }

    /// Whether `next` is a legal transition from this status.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Processing | Self::Failed),
            Self::Processing => matches!(
                next,
                Self::Completed | Self::CompletedUnlinked | Self::Failed
            ),
            Self::Failed => matches!(next, Self::FailedRefunded),
            Self::Completed | Self::CompletedUnlinked | Self::FailedRefunded => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::CompletedUnlinked => "completed_unlinked",
            Self::Failed => "failed",
            Self::FailedRefunded => "failed_refunded",
        };
        f.write_str(s)
    }
}

/// Kind of a task lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Task created and credits reserved.
    Created,
    /// Worker claimed the task.
    ProcessingStarted,
    /// Provider call started.
    ProviderCallStart,
    /// Provider rejected the prompt on policy grounds.
    PolicyBlock,
    /// Prompt rewritten by the optimizer for the policy retry.
    PromptRewritten,
    /// Provider returned a usable image.
    ProviderResponse,
    /// Artifact persistence started.
    ArtifactPersistStart,
    /// Artifact persisted and linked.
    ArtifactPersistSuccess,
    /// Artifact persistence failed (task degrades to `completed_unlinked`).
    ArtifactPersistFailure,
    /// Credits settled.
    Settled,
    /// Task failed.
    Failed,
    /// Credits refunded.
    Refunded,
    /// Task was detected stale and forcibly reclaimed.
    Reclaimed,
}

/// One entry of a task's ordered, append-only lifecycle log.
///
/// Kept for operator diagnostics; the log is never consulted by the state
/// machine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    /// What happened.
    pub kind: StepKind,
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Optional human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TaskStep {
    /// Create a step with no detail.
    #[must_use]
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            at: Utc::now(),
            detail: None,
        }
    }

    /// Create a step with a detail message.
    #[must_use]
    pub fn with_detail(kind: StepKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            at: Utc::now(),
            detail: Some(detail.into()),
        }
    }
}

/// One generation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID (ULID for time-ordering).
    pub id: TaskId,

    /// The submitting user.
    pub user_id: UserId,

    /// The user's prompt as submitted.
    pub prompt: String,

    /// Vehicle model slug the wrap targets.
    pub model_slug: String,

    /// Reference image inputs (0-3, allow-listed URLs or inline data).
    pub reference_images: Vec<String>,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Credits reserved at submission (settled or refunded at the end).
    pub credits_reserved: i64,

    /// Client-supplied idempotency key, unique per user.
    pub idempotency_key: Option<String>,

    /// Number of provider attempts made so far.
    pub attempts: u32,

    /// Ordered append-only lifecycle log.
    pub steps: Vec<TaskStep>,

    /// Stable error code for a failed task.
    pub error_code: Option<String>,

    /// Human-readable error message for a failed task.
    pub error_message: Option<String>,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// When the task was last updated.
    pub updated_at: DateTime<Utc>,

    /// When a worker claimed the task.
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,

    /// The persisted wrap, set on successful completion.
    pub wrap_id: Option<WrapId>,
}

impl Task {
    /// Create a new pending task with the given reservation.
    #[must_use]
    pub fn new(
        user_id: UserId,
        prompt: String,
        model_slug: String,
        reference_images: Vec<String>,
        credits_reserved: i64,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            user_id,
            prompt,
            model_slug,
            reference_images,
            status: TaskStatus::Pending,
            credits_reserved,
            idempotency_key,
            attempts: 0,
            steps: vec![TaskStep::new(StepKind::Created)],
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            wrap_id: None,
        }
    }

    /// Age of the task relative to `now`, as whole seconds.
    #[must_use]
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }

    /// Whether the task is in flight (pending or processing).
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.status.is_in_flight()
    }
}
