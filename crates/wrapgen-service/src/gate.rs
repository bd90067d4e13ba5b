//! Submission gate.
//!
//! Everything between "request arrived" and "worker spawned": rate limits,
//! input validation, idempotent replay (including stale-task reclaim), and
//! the credit reservation.

use std::sync::Arc;

use chrono::Utc;

use wrapgen_core::{
    validate_idempotency_key, validate_prompt, validate_reference_images, CoreError, Task, UserId,
};
use wrapgen_store::{ReserveOutcome, Store};

use crate::error::ApiError;
use crate::reclaim;
use crate::state::AppState;
use crate::worker;

/// Validated submission input.
#[derive(Debug, Clone)]
pub struct SubmitParams {
    /// The user's prompt.
    pub prompt: String,
    /// Vehicle model slug.
    pub model_slug: String,
    /// Reference images (URLs or data URIs).
    pub reference_images: Vec<String>,
    /// Client idempotency key.
    pub idempotency_key: String,
    /// Client origin, when the request carried one.
    pub origin: Option<String>,
}

/// What the gate decided.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// A new task was created; a worker is running it.
    Accepted {
        /// The created task.
        task: Task,
        /// Available balance after the reservation.
        remaining: i64,
    },
    /// The idempotency key matched an existing task; its status is replayed.
    Replay(Task),
    /// The idempotency key matched a stale in-flight task; it was reclaimed
    /// and refunded, and the client should submit again.
    StaleReset {
        /// The reclaimed task.
        task: Task,
    },
}

/// Run the submission gate and, on acceptance, hand the task to a worker.
pub async fn submit(
    state: &Arc<AppState>,
    user_id: UserId,
    params: SubmitParams,
) -> Result<SubmitOutcome, ApiError> {
    // Rate limits first; nothing below is reached by a flooding client.
    if !state.user_limiter.allow(&user_id.to_string()) {
        return Err(ApiError::RateLimited {
            retry_after_seconds: seconds_hint(state.user_limiter.window()),
        });
    }
    if let Some(origin) = &params.origin {
        if !state.origin_limiter.allow(origin) {
            return Err(ApiError::RateLimited {
                retry_after_seconds: seconds_hint(state.origin_limiter.window()),
            });
        }
    }

    validate_prompt(&params.prompt)?;
    validate_idempotency_key(&params.idempotency_key)?;
    validate_reference_images(&params.reference_images, &state.config.reference_image_hosts)?;
    let model = state
        .config
        .find_model(&params.model_slug)
        .ok_or_else(|| CoreError::UnknownModel(params.model_slug.clone()))?;

    // Idempotent replay, with opportunistic reclaim of stale tasks.
    if let Some(existing) = state
        .store
        .find_task_by_idempotency_key(&user_id, &params.idempotency_key)?
    {
        if reclaim::is_stale(&existing, state.config.stale_after_seconds, Utc::now()) {
            reclaim::reclaim_stale(state.store.as_ref(), &existing)?;
            let task = state
                .store
                .get_task(&existing.id)?
                .unwrap_or(existing);
            tracing::info!(task_id = %task.id, user_id = %user_id, "stale task reclaimed on resubmission");
            return Ok(SubmitOutcome::StaleReset { task });
        }
        return Ok(SubmitOutcome::Replay(existing));
    }

    let task = Task::new(
        user_id,
        params.prompt,
        model.slug.clone(),
        params.reference_images,
        state.config.generation_cost,
        Some(params.idempotency_key),
    );

    match state
        .store
        .reserve_task(task, state.config.in_flight_cap)?
    {
        ReserveOutcome::Created { task, remaining } => {
            tracing::info!(
                task_id = %task.id,
                user_id = %user_id,
                reserved = task.credits_reserved,
                remaining,
                "task accepted"
            );
            tokio::spawn(worker::run_generation(Arc::clone(state), task.clone()));
            Ok(SubmitOutcome::Accepted { task, remaining })
        }
        // Lost a race with a concurrent identical submission.
        ReserveOutcome::Duplicate { existing } => Ok(SubmitOutcome::Replay(existing)),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn seconds_hint(window: std::time::Duration) -> u32 {
    window.as_secs().min(u64::from(u32::MAX)) as u32
}
