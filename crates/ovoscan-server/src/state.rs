//! Application state shared by the HTTP handlers

use std::sync::Arc;

use ovoscan_core::DetectionService;

/// Handle to the detection service, cloned into every request
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DetectionService>,
    /// Upper bound for a whole upload request body
    pub max_request_bytes: usize,
}

impl AppState {
    pub fn new(service: Arc<DetectionService>, max_request_bytes: usize) -> Self {
        Self {
            service,
            max_request_bytes,
        }
    }
}
