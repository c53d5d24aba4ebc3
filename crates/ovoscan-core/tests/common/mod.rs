//! Shared helpers for ovoscan-core integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

use ovoscan_core::{DetectionError, DetectionService, Detector, ImageUpload, Phase, StatusReport};

/// Minimal PNG signature plus IHDR tag, enough for format sniffing
pub const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

/// A PNG-looking image whose trailing bytes script the detector
///
/// `FAIL` fails the image, `DOWN` makes the detector unavailable, `PANIC`
/// panics; anything else is echoed back as the label.
pub fn png(tag: &str) -> Bytes {
    let mut data = PNG_HEADER.to_vec();
    data.extend_from_slice(tag.as_bytes());
    Bytes::from(data)
}

pub fn image(filename: &str, tag: &str) -> ImageUpload {
    ImageUpload::new(filename, png(tag))
}

/// Detector driven by the image payload
#[derive(Default)]
pub struct ScriptedDetector {
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits for one permit released through [`release`](Self::release)
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn release(&self, images: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(images);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn detect(&self, image: &[u8]) -> Result<String, DetectionError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| DetectionError::Unavailable(e.to_string()))?
                .forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let tag = String::from_utf8_lossy(&image[PNG_HEADER.len()..]).into_owned();
        match tag.as_str() {
            "FAIL" => Err(DetectionError::Image("unreadable image".to_string())),
            "DOWN" => Err(DetectionError::Unavailable("model server unreachable".to_string())),
            "PANIC" => panic!("detector crashed"),
            _ => Ok(tag),
        }
    }
}

/// Poll a session the way a client would until it reaches a terminal phase
pub async fn wait_terminal(service: &DetectionService, session_id: &str) -> StatusReport {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let report = service.status(session_id).expect("session exists");
            if report.status.is_terminal() {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session did not finish in time")
}

/// Poll until `predicate` holds for the session's status
pub async fn wait_until<F>(service: &DetectionService, session_id: &str, predicate: F) -> StatusReport
where
    F: Fn(&StatusReport) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let report = service.status(session_id).expect("session exists");
            if predicate(&report) {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

pub fn phase_rank(phase: Phase) -> u8 {
    match phase {
        Phase::Pending => 0,
        Phase::Running => 1,
        Phase::Complete | Phase::Failed => 2,
    }
}
