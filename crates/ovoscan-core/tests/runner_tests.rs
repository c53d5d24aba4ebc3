//! Job runner integration tests
//!
//! Tests for worker pool bounds, job timeouts, and the single-writer lease.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{image, ScriptedDetector};
use ovoscan_core::{DetectionJob, Error, JobRunner, Phase, SessionStore};

fn store() -> Arc<SessionStore> {
    Arc::new(SessionStore::new(Duration::from_secs(3600), 64))
}

fn job(store: &SessionStore, tags: &[&str]) -> DetectionJob {
    let images: Vec<_> = tags
        .iter()
        .enumerate()
        .map(|(i, tag)| image(&format!("img-{}.png", i), tag))
        .collect();
    DetectionJob {
        session_id: store.create(images.len()).unwrap(),
        images,
    }
}

mod pool_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_worker_queues_second_session() {
        let store = store();
        let detector = Arc::new(ScriptedDetector::gated());
        let runner = JobRunner::new(Arc::clone(&store), detector.clone(), 1);

        let first = job(&store, &["a"]);
        let second = job(&store, &["b"]);
        let (first_id, second_id) = (first.session_id.clone(), second.session_id.clone());

        let first_handle = runner.submit(first).unwrap();
        let second_handle = runner.submit(second).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.get(&first_id).unwrap().phase != Phase::Running
                && store.get(&second_id).unwrap().phase != Phase::Running
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let phases = [
            store.get(&first_id).unwrap().phase,
            store.get(&second_id).unwrap().phase,
        ];
        assert!(phases.contains(&Phase::Running));
        assert!(phases.contains(&Phase::Pending));
        assert_eq!(runner.idle_workers(), 0);

        detector.release(2);
        first_handle.await.unwrap();
        second_handle.await.unwrap();

        assert_eq!(store.get(&first_id).unwrap().phase, Phase::Complete);
        assert_eq!(store.get(&second_id).unwrap().phase, Phase::Complete);
        assert_eq!(runner.idle_workers(), 1);
    }

    #[tokio::test]
    async fn test_session_can_only_be_submitted_once() {
        let store = store();
        let runner = JobRunner::new(Arc::clone(&store), Arc::new(ScriptedDetector::new()), 1);
        let first = job(&store, &["a"]);
        let again = first.clone();

        let handle = runner.submit(first).unwrap();
        assert!(matches!(runner.submit(again), Err(Error::Consistency(_))));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_unknown_session_is_not_found() {
        let runner = JobRunner::new(store(), Arc::new(ScriptedDetector::new()), 1);
        let orphan = DetectionJob {
            session_id: "missing".to_string(),
            images: vec![image("a.png", "eggs")],
        };
        assert!(matches!(runner.submit(orphan), Err(Error::NotFound(_))));
    }
}

mod timeout_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_overrun_fails_with_partial_results() {
        let store = store();
        let detector = Arc::new(ScriptedDetector::with_delay(Duration::from_secs(2)));
        let runner = JobRunner::new(Arc::clone(&store), detector, 1)
            .with_job_timeout(Some(Duration::from_secs(5)));

        let work = job(&store, &["a", "b", "c", "d"]);
        let id = work.session_id.clone();
        runner.submit(work).unwrap().await.unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.phase, Phase::Failed);
        assert!(session.error.as_ref().unwrap().contains("time limit of 5s"));
        assert_eq!(session.processed, 2);
        assert!(session.check_invariants().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_while_queued_fails_session() {
        let store = store();
        let detector = Arc::new(ScriptedDetector::gated());
        let runner = JobRunner::new(Arc::clone(&store), detector.clone(), 1)
            .with_job_timeout(Some(Duration::from_secs(1)));

        let blocker = runner.submit(job(&store, &["a"])).unwrap();
        let queued = job(&store, &["b"]);
        let queued_id = queued.session_id.clone();
        runner.submit(queued).unwrap().await.unwrap();

        let session = store.get(&queued_id).unwrap();
        assert_eq!(session.phase, Phase::Failed);
        assert_eq!(session.processed, 0);
        assert!(session.error.unwrap().contains("time limit"));

        blocker.await.unwrap();
        assert_eq!(detector.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subsecond_limit_is_reported_precisely() {
        let store = store();
        let detector = Arc::new(ScriptedDetector::with_delay(Duration::from_secs(2)));
        let runner = JobRunner::new(Arc::clone(&store), detector, 1)
            .with_job_timeout(Some(Duration::from_millis(500)));

        let work = job(&store, &["a"]);
        let id = work.session_id.clone();
        runner.submit(work).unwrap().await.unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.phase, Phase::Failed);
        assert!(session.error.unwrap().contains("time limit of 500ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_within_limit_completes() {
        let store = store();
        let detector = Arc::new(ScriptedDetector::with_delay(Duration::from_millis(100)));
        let runner = JobRunner::new(Arc::clone(&store), detector, 2)
            .with_job_timeout(Some(Duration::from_secs(5)));

        let work = job(&store, &["a", "FAIL"]);
        let id = work.session_id.clone();
        runner.submit(work).unwrap().await.unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.phase, Phase::Complete);
        assert_eq!(session.results["img-0.png"], "a");
        assert!(session.results["img-1.png"].starts_with("error: "));
    }
}
