//! Persisted artifact records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, UserId, WrapId};

/// A persisted generation artifact reference.
///
/// The texture itself lives in external object storage; this record links a
/// completed task to the stored texture URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wrap {
    /// Unique wrap ID.
    pub id: WrapId,

    /// Owning user.
    pub user_id: UserId,

    /// The task that produced this wrap.
    pub task_id: TaskId,

    /// URL of the stored texture.
    pub texture_url: String,

    /// When the wrap was persisted.
    pub created_at: DateTime<Utc>,
}

impl Wrap {
    /// Create a new wrap record for a task.
    #[must_use]
    pub fn new(user_id: UserId, task_id: TaskId, texture_url: String) -> Self {
        Self {
            id: WrapId::generate(),
            user_id,
            task_id,
            texture_url,
            created_at: Utc::now(),
        }
    }
}
