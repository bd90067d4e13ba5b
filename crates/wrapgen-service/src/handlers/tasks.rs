//! Task status and listing handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use wrapgen_core::{StepKind, Task, TaskStep};
use wrapgen_store::Store;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Task status request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusRequest {
    /// The task to look up.
    pub task_id: String,
}

/// Task status response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
    /// Task ID.
    pub task_id: String,
    /// Current status.
    pub status: String,
    /// Whether the worker is on its policy-retry attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrying: Option<bool>,
    /// When the policy-retry attempt began.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_started_at: Option<String>,
    /// The persisted wrap, for completed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_id: Option<String>,
    /// Texture URL, for completed tasks with a linked wrap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub texture_url: Option<String>,
    /// Stable error code, for failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable error, for failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Poll the status of a generation task.
///
/// Tasks are only visible to their owner; anything else reads as not found.
/// In-flight tasks answer with a `Retry-After` polling hint.
pub async fn task_status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<TaskStatusRequest>,
) -> Result<Response, ApiError> {
    let task_id = body
        .task_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid task ID".into()))?;

    let task = state
        .store
        .get_task(&task_id)?
        .filter(|t| t.user_id == auth.user_id)
        .ok_or_else(|| ApiError::NotFound(format!("task not found: {task_id}")))?;

    let mut response = TaskStatusResponse {
        task_id: task.id.to_string(),
        status: task.status.to_string(),
        retrying: None,
        retry_started_at: None,
        wrap_id: None,
        texture_url: None,
        error_code: task.error_code.clone(),
        error: task.error_message.clone(),
    };

    if task.is_in_flight() {
        if let Some(step) = policy_retry_step(&task) {
            response.retrying = Some(true);
            response.retry_started_at = Some(step.at.to_rfc3339());
        }
        let mut out = (StatusCode::OK, Json(response)).into_response();
        let seconds = state.config.retry_after_seconds.to_string();
        if let Ok(value) = header::HeaderValue::from_str(&seconds) {
            out.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return Ok(out);
    }

    if let Some(wrap) = state.store.find_wrap_by_task(&task.id)? {
        response.wrap_id = Some(wrap.id.to_string());
        response.texture_url = Some(wrap.texture_url);
    }

    Ok(Json(response).into_response())
}

/// The step marking the one-shot policy retry, if the worker has taken it.
fn policy_retry_step(task: &Task) -> Option<&TaskStep> {
    task.steps
        .iter()
        .find(|step| step.kind == StepKind::PromptRewritten)
}

/// Task list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    /// Maximum number of tasks to return (default: 20, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

/// One task in list form.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    /// Task ID.
    pub task_id: String,
    /// Current status.
    pub status: String,
    /// The prompt as submitted.
    pub prompt: String,
    /// Vehicle model slug.
    pub model_slug: String,
    /// Stable error code, for failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.to_string(),
            status: task.status.to_string(),
            prompt: task.prompt.clone(),
            model_slug: task.model_slug.clone(),
            error_code: task.error_code.clone(),
            created_at: task.created_at.to_rfc3339(),
        }
    }
}

/// Task list response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksResponse {
    /// Tasks, newest first.
    pub tasks: Vec<TaskSummary>,
    /// Whether more tasks exist past this page.
    pub has_more: bool,
}

/// List the user's generation tasks, newest first.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<ListTasksResponse>, ApiError> {
    let limit = query.limit.min(100);
    let tasks = state
        .store
        .list_tasks_by_user(&auth.user_id, limit + 1, query.offset)?;

    let has_more = tasks.len() > limit;
    let tasks: Vec<_> = tasks.iter().take(limit).map(TaskSummary::from).collect();

    Ok(Json(ListTasksResponse { tasks, has_more }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wrapgen_core::UserId;

    #[test]
    fn policy_retry_step_reports_the_rewrite() {
        let mut task = Task::new(
            UserId::generate(),
            "aurora over mountains".into(),
            "model-3".into(),
            vec![],
            10,
            None,
        );
        assert!(policy_retry_step(&task).is_none());

        task.steps
            .push(TaskStep::with_detail(StepKind::PromptRewritten, "calmer prompt"));
        let step = policy_retry_step(&task).expect("rewrite step");
        assert_eq!(step.kind, StepKind::PromptRewritten);
    }
}
