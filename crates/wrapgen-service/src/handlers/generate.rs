//! Wrap generation submission handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use wrapgen_core::{Task, TaskStatus};
use wrapgen_store::Store;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::gate::{self, SubmitOutcome, SubmitParams};
use crate::state::AppState;

/// Generation request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// The design prompt.
    pub prompt: String,
    /// Vehicle model slug.
    pub model_slug: String,
    /// Reference images (allow-listed URLs or data URIs), at most 3.
    #[serde(default)]
    pub reference_images: Vec<String>,
    /// Client idempotency key; resubmitting with the same key replays the
    /// original task instead of creating a new one.
    pub idempotency_key: String,
}

/// Generation response, covering both fresh submissions and replays.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Whether the generation succeeded or is still on its way to success.
    pub success: bool,
    /// The task driving (or having driven) this generation.
    pub task_id: String,
    /// Current task status.
    pub status: String,
    /// Available balance after the reservation (fresh submissions only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_balance: Option<i64>,
    /// Suggested polling interval while the task is in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u32>,
    /// The persisted wrap, for completed replays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_id: Option<String>,
    /// Texture URL, for completed replays with a linked wrap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub texture_url: Option<String>,
    /// Stable error code, for failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable error, for failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Submit a wrap generation.
///
/// Fresh submissions answer `202 Accepted` with a polling hint. Replays of a
/// finished task answer `200` with the terminal outcome; replays of an
/// in-flight task answer `202` again.
pub async fn generate_wrap(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(body): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let params = SubmitParams {
        prompt: body.prompt,
        model_slug: body.model_slug,
        reference_images: body.reference_images,
        idempotency_key: body.idempotency_key,
        origin,
    };

    let retry_after = state.config.retry_after_seconds;
    match gate::submit(&state, auth.user_id, params).await? {
        SubmitOutcome::Accepted { task, remaining } => Ok(accepted(
            GenerateResponse {
                success: true,
                task_id: task.id.to_string(),
                status: task.status.to_string(),
                remaining_balance: Some(remaining),
                retry_after_seconds: Some(retry_after),
                wrap_id: None,
                texture_url: None,
                error_code: None,
                error: None,
            },
            retry_after,
        )),
        SubmitOutcome::Replay(task) => replay_response(&state, &task, retry_after),
        SubmitOutcome::StaleReset { task } => Ok(Json(GenerateResponse {
            success: false,
            task_id: task.id.to_string(),
            status: task.status.to_string(),
            remaining_balance: None,
            retry_after_seconds: None,
            wrap_id: None,
            texture_url: None,
            error_code: task.error_code,
            error: Some("previous attempt went stale and was refunded; submit again with a new key".into()),
        })
        .into_response()),
    }
}

/// Replay the outcome of a previously submitted task.
fn replay_response(
    state: &AppState,
    task: &Task,
    retry_after: u32,
) -> Result<Response, ApiError> {
    let mut response = GenerateResponse {
        success: true,
        task_id: task.id.to_string(),
        status: task.status.to_string(),
        remaining_balance: None,
        retry_after_seconds: None,
        wrap_id: None,
        texture_url: None,
        error_code: None,
        error: None,
    };

    match task.status {
        TaskStatus::Pending | TaskStatus::Processing => {
            response.retry_after_seconds = Some(retry_after);
            Ok(accepted(response, retry_after))
        }
        TaskStatus::Completed | TaskStatus::CompletedUnlinked => {
            if let Some(wrap) = state.store.find_wrap_by_task(&task.id)? {
                response.wrap_id = Some(wrap.id.to_string());
                response.texture_url = Some(wrap.texture_url);
            }
            Ok(Json(response).into_response())
        }
        TaskStatus::Failed | TaskStatus::FailedRefunded => {
            response.success = false;
            response.error_code = task.error_code.clone();
            response.error = task.error_message.clone();
            Ok(Json(response).into_response())
        }
    }
}

/// A `202 Accepted` response carrying a `Retry-After` polling hint.
fn accepted(body: GenerateResponse, retry_after: u32) -> Response {
    let mut response = (StatusCode::ACCEPTED, Json(body)).into_response();
    if let Ok(value) = header::HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}
