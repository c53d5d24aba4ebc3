//! Detector seam
//!
//! The detection model is an external collaborator: something that takes the
//! bytes of one image and answers with a label. The job runner only ever sees
//! the [`Detector`] trait.
//!
//! Adapters:
//! - [`BlockingDetector`] wraps a synchronous function and runs it on the
//!   blocking thread pool
//! - [`CommandDetector`] pipes each image through an external program

mod command;

pub use command::CommandDetector;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DetectionError;

/// Prefix of the label recorded for an image whose detection failed
pub const DETECTION_ERROR_PREFIX: &str = "error: ";

/// Build the sentinel label stored for a failed image
pub fn error_label(cause: &str) -> String {
    format!("{}{}", DETECTION_ERROR_PREFIX, cause)
}

/// Whether a recorded label is a failure sentinel
pub fn is_error_label(label: &str) -> bool {
    label.starts_with(DETECTION_ERROR_PREFIX)
}

/// Produces a label for a single image
///
/// Implementations must tolerate being called from several jobs at once
/// (the worker pool bounds how many).
#[async_trait]
pub trait Detector: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Label one image
    async fn detect(&self, image: &[u8]) -> Result<String, DetectionError>;
}

type DetectFn = dyn Fn(&[u8]) -> Result<String, DetectionError> + Send + Sync;

/// Runs a synchronous detection function on the blocking thread pool
pub struct BlockingDetector {
    name: String,
    detect_fn: Arc<DetectFn>,
}

impl BlockingDetector {
    pub fn new<F>(name: impl Into<String>, detect_fn: F) -> Self
    where
        F: Fn(&[u8]) -> Result<String, DetectionError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            detect_fn: Arc::new(detect_fn),
        }
    }
}

#[async_trait]
impl Detector for BlockingDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect(&self, image: &[u8]) -> Result<String, DetectionError> {
        let detect_fn = Arc::clone(&self.detect_fn);
        let image = image.to_vec();
        tokio::task::spawn_blocking(move || detect_fn(&image))
            .await
            .map_err(|e| DetectionError::Image(format!("detector panicked: {}", e)))?
    }
}
