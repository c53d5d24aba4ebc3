//! Detection service - the upload, status, and result handlers
//!
//! Transport-agnostic: the HTTP layer and tests call these directly.
//! `upload` is the only operation that writes, and it only creates the
//! session; everything after that belongs to the job runner.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::runner::{DetectionJob, JobRunner};
use crate::session::{Phase, Session, SessionId, SessionStore};
use crate::upload::{ImageUpload, UploadValidator};

/// Answer to a status poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: Phase,
    /// processed / total, in `0.0..=1.0`
    pub progress: f64,
    pub processed: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Session> for StatusReport {
    fn from(session: &Session) -> Self {
        Self {
            status: session.phase,
            progress: session.progress(),
            processed: session.processed,
            total: session.total,
            error: session.error.clone(),
        }
    }
}

/// Results of a completed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultReport {
    pub total_images: usize,
    pub results: BTreeMap<String, String>,
}

/// Upload/status/result handlers over one store and runner
pub struct DetectionService {
    store: Arc<SessionStore>,
    runner: JobRunner,
    validator: UploadValidator,
}

impl DetectionService {
    pub fn new(runner: JobRunner, validator: UploadValidator) -> Self {
        Self {
            store: Arc::clone(runner.store()),
            runner,
            validator,
        }
    }

    /// Build the store, runner, and validator described by `config`
    pub fn from_config(config: &Config, detector: Arc<dyn Detector>) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SessionStore::from_config(&config.store));
        let runner = JobRunner::from_config(store, detector, &config.runner);
        let validator = UploadValidator::from_config(&config.upload)?;
        Ok(Self::new(runner, validator))
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Accept a batch and start detecting it in the background
    ///
    /// Nothing is created unless every file passes validation. Returns as
    /// soon as the job is queued. Must be called from within a Tokio runtime.
    pub fn upload(&self, batch: Vec<ImageUpload>) -> Result<SessionId> {
        let images = self.validator.validate(batch)?;
        let session_id = self.store.create(images.len())?;

        self.runner.submit(DetectionJob {
            session_id: session_id.clone(),
            images,
        })?;
        info!(session_id = %session_id, "Upload accepted");

        Ok(session_id)
    }

    /// Current phase and progress of a session
    pub fn status(&self, session_id: &str) -> Result<StatusReport> {
        let session = self.store.get(session_id)?;
        debug!(session_id, phase = %session.phase, processed = session.processed, "Status polled");
        Ok(StatusReport::from(&session))
    }

    /// Final results of a session
    ///
    /// Fails with `NotReady` while the job is pending or running and with
    /// `JobFailed` carrying the recorded cause if it failed.
    pub fn result(&self, session_id: &str) -> Result<ResultReport> {
        let session = self.store.get(session_id)?;
        match session.phase {
            Phase::Complete => Ok(ResultReport {
                total_images: session.total,
                results: session.results,
            }),
            Phase::Failed => Err(Error::JobFailed(
                session.error.unwrap_or_else(|| "unknown failure".to_string()),
            )),
            phase @ (Phase::Pending | Phase::Running) => Err(Error::NotReady {
                id: session.id,
                phase: phase.to_string(),
            }),
        }
    }
}
