//! Artifact persistence seam.
//!
//! The worker hands finished images to an [`ArtifactSink`], which stores the
//! texture somewhere durable and returns the URL the wrap record should
//! reference. A sink failure does not fail the generation: the task settles
//! as `completed_unlinked`, with no wrap record to point at.

use async_trait::async_trait;

use wrapgen_core::Task;
use wrapgen_provider::ImagePayload;

/// Error from artifact persistence.
#[derive(Debug, thiserror::Error)]
#[error("artifact persistence failed: {0}")]
pub struct SinkError(pub String);

/// Stores a generated texture and returns its URL.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persist the image for this task; returns the stored texture URL.
    async fn persist(&self, task: &Task, image: &ImagePayload) -> Result<String, SinkError>;
}

/// Passthrough sink: no external storage, the texture URL is the image's own
/// `data:` URL. The default for single-node deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataUrlSink;

#[async_trait]
impl ArtifactSink for DataUrlSink {
    async fn persist(&self, _task: &Task, image: &ImagePayload) -> Result<String, SinkError> {
        Ok(image.data_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wrapgen_core::UserId;

    #[tokio::test]
    async fn data_url_sink_is_passthrough() {
        let task = Task::new(UserId::generate(), "p".into(), "model-3".into(), vec![], 10, None);
        let image = ImagePayload {
            mime_type: "image/png".into(),
            base64: "QQ==".into(),
        };
        let url = DataUrlSink.persist(&task, &image).await.unwrap();
        assert_eq!(url, "data:image/png;base64,QQ==");
    }
}
