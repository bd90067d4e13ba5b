//! The generation worker.
//!
//! Drives one task end to end: mark processing, call the provider (with the
//! one-shot policy-retry rewrite), persist the artifact, settle. Any failure
//! ends in `failed` plus a best-effort refund, so no task is ever left
//! `processing` by a live worker.

use std::sync::Arc;

use wrapgen_core::{StepKind, Task, TaskStep, Wrap};
use wrapgen_provider::{FailureKind, GenerationRequest, ImageInput};
use wrapgen_store::Store;

use crate::state::AppState;

/// Terminal failure of a generation, in error-taxonomy terms.
struct WorkerFailure {
    code: &'static str,
    message: String,
}

impl WorkerFailure {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: "unknown_error",
            message: message.into(),
        }
    }
}

/// Run one generation task to a terminal state.
///
/// Spawned by the submission gate; never panics the caller and never returns
/// an error. All failures are recorded on the task.
pub async fn run_generation(state: Arc<AppState>, task: Task) {
    let task_id = task.id;
    if let Err(failure) = drive(&state, task).await {
        tracing::warn!(
            task_id = %task_id,
            error_code = failure.code,
            message = %failure.message,
            "generation failed"
        );
        // The cleanup pair: fail, then refund. Each is idempotent, so a
        // partial earlier failure path cannot double-charge or double-refund.
        if let Err(e) = state.store.fail_task(&task_id, failure.code, &failure.message) {
            tracing::error!(task_id = %task_id, error = %e, "failed to mark task failed");
        }
        match state.store.refund_task(&task_id, &failure.message) {
            Ok(outcome) => tracing::info!(
                task_id = %task_id,
                refunded = outcome.refunded,
                balance = outcome.balance,
                "task refunded"
            ),
            Err(e) => tracing::error!(task_id = %task_id, error = %e, "refund failed"),
        }
    }
}

async fn drive(state: &Arc<AppState>, task: Task) -> Result<(), WorkerFailure> {
    let store = state.store.as_ref();
    let task = store
        .mark_task_processing(&task.id)
        .map_err(|e| WorkerFailure::internal(format!("cannot start task: {e}")))?;

    let model = state
        .config
        .find_model(&task.model_slug)
        .ok_or_else(|| WorkerFailure::internal(format!("model vanished: {}", task.model_slug)))?
        .clone();

    let mut request = GenerationRequest {
        prompt: compose_prompt(&model.display_name, &task.prompt),
        aspect_ratio: model.aspect_ratio.clone(),
        mask: model.mask_url.clone().map(ImageInput::Url),
        references: task.reference_images.iter().map(|s| parse_image_ref(s)).collect(),
    };

    record_attempt(store, &task)?;
    let mut result = state.provider.generate(&request).await;

    // One-shot policy retry: rewrite the prompt and try once more.
    if let Err(failure) = &result.outcome {
        if matches!(
            failure.kind,
            FailureKind::PromptBlocked | FailureKind::RecitationBlocked | FailureKind::NoImagePayload
        ) {
            let _ = store.append_task_step(
                &task.id,
                TaskStep::with_detail(StepKind::PolicyBlock, failure.kind.as_code()),
            );
            let rewrite = state.optimizer.rewrite(&task.prompt, failure).await;
            if rewrite.changed {
                let _ = store.append_task_step(
                    &task.id,
                    TaskStep::with_detail(StepKind::PromptRewritten, rewrite.prompt.clone()),
                );
                request.prompt = compose_prompt(&model.display_name, &rewrite.prompt);
                record_attempt(store, &task)?;
                result = state.provider.generate(&request).await;
            }
        }
    }

    let image = match result.outcome {
        Ok(image) => image,
        Err(failure) => {
            return Err(WorkerFailure {
                code: failure.kind.as_code(),
                message: failure.message,
            })
        }
    };

    let _ = store.append_task_step(
        &task.id,
        TaskStep::with_detail(
            StepKind::ProviderResponse,
            result.model.unwrap_or_default(),
        ),
    );

    // Artifact persistence. A sink failure settles the task without a wrap
    // record (completed_unlinked) rather than failing a paid-for generation.
    let _ = store.append_task_step(&task.id, TaskStep::new(StepKind::ArtifactPersistStart));
    let wrap = match state.artifacts.persist(&task, &image).await {
        Ok(texture_url) => {
            let _ = store
                .append_task_step(&task.id, TaskStep::new(StepKind::ArtifactPersistSuccess));
            Some(Wrap::new(task.user_id, task.id, texture_url))
        }
        Err(e) => {
            tracing::warn!(task_id = %task.id, error = %e, "artifact persistence failed");
            let _ = store.append_task_step(
                &task.id,
                TaskStep::with_detail(StepKind::ArtifactPersistFailure, e.to_string()),
            );
            None
        }
    };

    store
        .settle_task(&task.id, wrap)
        .map_err(|e| WorkerFailure::internal(format!("settlement failed: {e}")))?;
    Ok(())
}

fn record_attempt(store: &dyn Store, task: &Task) -> Result<(), WorkerFailure> {
    store
        .record_task_attempt(&task.id)
        .map_err(|e| WorkerFailure::internal(format!("cannot record attempt: {e}")))?;
    store
        .append_task_step(&task.id, TaskStep::new(StepKind::ProviderCallStart))
        .map_err(|e| WorkerFailure::internal(format!("cannot append step: {e}")))?;
    Ok(())
}

/// Compose the full prompt sent to the image model.
fn compose_prompt(model_name: &str, user_prompt: &str) -> String {
    format!(
        "TASK: Create a print-ready automotive wrap texture for {model_name}.\n\n\
         The design must fill the wrap surface edge to edge and respect the \
         mask boundary exactly. Seamless, high-detail, suitable for large-format print.\n\n\
         Theme Request: \"{}\"\n\n\
         No text, logos, watermark, UI, or letters.",
        user_prompt.trim()
    )
}

/// Interpret a reference image string as a provider input.
///
/// `data:<mime>;base64,<payload>` becomes an inline part; anything else is
/// passed as a URL (the gate already validated the allow-list).
fn parse_image_ref(value: &str) -> ImageInput {
    if let Some(rest) = value.strip_prefix("data:") {
        if let Some((mime, data)) = rest.split_once(";base64,") {
            return ImageInput::Inline {
                mime: mime.to_string(),
                base64: data.to_string(),
            };
        }
    }
    ImageInput::Url(value.to_string())
}
