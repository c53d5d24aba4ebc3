//! Job runner - drains a session's images through the detector
//!
//! Each submitted job runs on its own task. A semaphore sized by
//! `runner.workers` bounds how many jobs talk to the detector at once; a job
//! stays `Pending` until it gets a permit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::RunnerConfig;
use crate::detector::{error_label, Detector};
use crate::error::{Error, Result};
use crate::session::{SessionId, SessionStore, SessionWriter};
use crate::upload::ImageUpload;

/// A session's images, in submission order
#[derive(Debug, Clone)]
pub struct DetectionJob {
    pub session_id: SessionId,
    pub images: Vec<ImageUpload>,
}

/// Runs detection jobs against a shared detector
pub struct JobRunner {
    store: Arc<SessionStore>,
    detector: Arc<dyn Detector>,
    workers: Arc<Semaphore>,
    job_timeout: Option<Duration>,
}

impl JobRunner {
    pub fn new(store: Arc<SessionStore>, detector: Arc<dyn Detector>, workers: usize) -> Self {
        Self {
            store,
            detector,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            job_timeout: None,
        }
    }

    pub fn from_config(
        store: Arc<SessionStore>,
        detector: Arc<dyn Detector>,
        config: &RunnerConfig,
    ) -> Self {
        Self::new(store, detector, config.workers).with_job_timeout(config.job_timeout())
    }

    /// Fail jobs that are still unfinished `timeout` after submission
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Workers not currently running a job
    pub fn idle_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Start a job in the background
    ///
    /// The session's writer lease is claimed before this returns, so a
    /// session can only ever be submitted once. The returned handle resolves
    /// after the session has reached a terminal phase.
    pub fn submit(&self, job: DetectionJob) -> Result<JoinHandle<()>> {
        let writer = Arc::new(self.store.claim(&job.session_id)?);
        let detector = Arc::clone(&self.detector);
        let workers = Arc::clone(&self.workers);
        let job_timeout = self.job_timeout;

        Ok(tokio::spawn(async move {
            let session_id = job.session_id.clone();
            let body = tokio::spawn(execute(
                Arc::clone(&writer),
                detector,
                workers,
                job.images,
                job_timeout,
            ));

            if let Err(join_err) = body.await {
                error!(session_id = %session_id, error = %join_err, "Detection job aborted");
                let cause = if join_err.is_panic() {
                    "detection job panicked"
                } else {
                    "detection job was cancelled"
                };
                if let Err(e) = writer.fail(cause) {
                    error!(session_id = %session_id, error = %e, "Failed to record job abort");
                }
            }
        }))
    }
}

async fn execute(
    writer: Arc<SessionWriter>,
    detector: Arc<dyn Detector>,
    workers: Arc<Semaphore>,
    images: Vec<ImageUpload>,
    job_timeout: Option<Duration>,
) {
    let started = Instant::now();
    let total = images.len();
    let work = process(&writer, detector.as_ref(), &workers, images);

    let outcome = match job_timeout {
        Some(limit) => tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
            Err(Error::JobFailed(format!(
                "job exceeded time limit of {:?}",
                limit
            )))
        }),
        None => work.await,
    };

    let finished = match outcome {
        Ok(()) => writer.complete(),
        Err(err) => {
            let cause = match err {
                Error::JobFailed(cause) => cause,
                other => other.to_string(),
            };
            error!(session_id = %writer.id(), %cause, "Detection job failed");
            writer.fail(cause)
        }
    };

    match finished {
        Ok(session) => info!(
            session_id = %writer.id(),
            phase = %session.phase,
            processed = session.processed,
            total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Detection job finished"
        ),
        Err(e) => error!(session_id = %writer.id(), error = %e, "Failed to finish session"),
    }
}

async fn process(
    writer: &SessionWriter,
    detector: &dyn Detector,
    workers: &Semaphore,
    images: Vec<ImageUpload>,
) -> Result<()> {
    let _permit = workers
        .acquire()
        .await
        .map_err(|_| Error::JobFailed("worker pool is shut down".to_string()))?;

    writer.start()?;
    info!(
        session_id = %writer.id(),
        detector = detector.name(),
        images = images.len(),
        "Detection job started"
    );

    for image in images {
        match detector.detect(&image.data).await {
            Ok(label) => {
                writer.record(&image.filename, label)?;
            }
            Err(err) if err.is_fatal() => {
                return Err(Error::JobFailed(err.to_string()));
            }
            Err(err) => {
                warn!(
                    session_id = %writer.id(),
                    filename = %image.filename,
                    error = %err,
                    "Detection failed for image"
                );
                writer.record(&image.filename, error_label(err.cause()))?;
            }
        }
    }

    Ok(())
}
