//! Session types for the detection pipeline
//!
//! A session is the server-side record of one submitted image batch. These
//! types describe its lifecycle and the rules every state change must obey.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a session
pub type SessionId = String;

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Created, waiting for a worker
    Pending,
    /// A worker is feeding images to the detector
    Running,
    /// Every image has a result
    Complete,
    /// The job stopped early; partial results are kept
    Failed,
}

impl Phase {
    /// Wire name of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Running => "running",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }

    /// Terminal phases never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }

    /// Whether `next` is reachable from `self` in one step
    ///
    /// Staying in the same non-terminal phase is allowed so that progress
    /// can be recorded while `Running`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        match (self, next) {
            (Phase::Pending, Phase::Pending | Phase::Running | Phase::Failed) => true,
            (Phase::Running, Phase::Running | Phase::Complete | Phase::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submitted batch and everything known about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub phase: Phase,
    /// Number of images submitted
    pub total: usize,
    /// Number of images with a recorded result
    pub processed: usize,
    /// Filename -> label, filled as images finish
    pub results: BTreeMap<String, String>,
    /// Cause of failure, only set in `Failed`
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    pub(crate) fn new(id: SessionId, total: usize, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            phase: Phase::Pending,
            total,
            processed: 0,
            results: BTreeMap::new(),
            error: None,
            created_at,
            started_at: None,
            finished_at: None,
        }
    }

    /// Fraction of images with a result, 1.0 for an empty batch
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Check the invariants that hold for every observable session
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.processed > self.total {
            return Err(format!(
                "processed ({}) exceeds total ({})",
                self.processed, self.total
            ));
        }
        if self.results.len() != self.processed {
            return Err(format!(
                "processed ({}) does not match result count ({})",
                self.processed,
                self.results.len()
            ));
        }
        if self.phase == Phase::Complete && self.processed != self.total {
            return Err(format!(
                "complete with {} of {} images processed",
                self.processed, self.total
            ));
        }
        match (self.phase, &self.error) {
            (Phase::Failed, None) => Err("failed without an error".to_string()),
            (phase, Some(_)) if phase != Phase::Failed => {
                Err(format!("error recorded while {}", phase))
            }
            _ => Ok(()),
        }
    }

    /// Check that `next` is a legal successor of `self`
    pub fn check_transition(&self, next: &Session) -> std::result::Result<(), String> {
        if self.is_terminal() {
            return Err(format!("session {} is already {}", self.id, self.phase));
        }
        if next.id != self.id || next.total != self.total || next.created_at != self.created_at
        {
            return Err("identity fields are immutable".to_string());
        }
        if !self.phase.can_transition_to(next.phase) {
            return Err(format!("illegal transition {} -> {}", self.phase, next.phase));
        }
        if next.processed < self.processed {
            return Err(format!(
                "processed went backwards ({} -> {})",
                self.processed, next.processed
            ));
        }
        if next.results != self.results && self.phase != Phase::Running {
            return Err(format!("results changed while {}", self.phase));
        }
        for (filename, label) in &self.results {
            if next.results.get(filename) != Some(label) {
                return Err(format!("result for {} was overwritten", filename));
            }
        }
        next.check_invariants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(total: usize) -> Session {
        let mut session = Session::new("s-1".to_string(), total, Utc::now());
        session.phase = Phase::Running;
        session
    }

    #[test]
    fn test_phase_transitions() {
        assert!(Phase::Pending.can_transition_to(Phase::Running));
        assert!(Phase::Pending.can_transition_to(Phase::Failed));
        assert!(Phase::Running.can_transition_to(Phase::Complete));
        assert!(!Phase::Pending.can_transition_to(Phase::Complete));
        assert!(!Phase::Running.can_transition_to(Phase::Pending));
        assert!(!Phase::Complete.can_transition_to(Phase::Running));
        assert!(!Phase::Failed.can_transition_to(Phase::Failed));
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(serde_json::to_string(&Phase::Running).unwrap(), "\"running\"");
        assert_eq!(Phase::Complete.to_string(), "complete");
    }

    #[test]
    fn test_progress() {
        let mut session = running(4);
        assert_eq!(session.progress(), 0.0);
        session.results.insert("a.png".to_string(), "egg".to_string());
        session.processed = 1;
        assert_eq!(session.progress(), 0.25);

        let empty = Session::new("s-2".to_string(), 0, Utc::now());
        assert_eq!(empty.progress(), 1.0);
    }

    #[test]
    fn test_record_is_legal() {
        let before = running(2);
        let mut after = before.clone();
        after.results.insert("a.png".to_string(), "egg".to_string());
        after.processed = 1;
        assert!(before.check_transition(&after).is_ok());
    }

    #[test]
    fn test_torn_record_rejected() {
        let before = running(2);
        let mut after = before.clone();
        after.processed = 1;
        let err = before.check_transition(&after).unwrap_err();
        assert!(err.contains("result count"));
    }

    #[test]
    fn test_overwrite_rejected() {
        let mut before = running(2);
        before.results.insert("a.png".to_string(), "egg".to_string());
        before.processed = 1;
        let mut after = before.clone();
        after.results.insert("a.png".to_string(), "none".to_string());
        after.results.insert("b.png".to_string(), "egg".to_string());
        after.processed = 2;
        assert!(before.check_transition(&after).unwrap_err().contains("overwritten"));
    }

    #[test]
    fn test_early_complete_rejected() {
        let before = running(2);
        let mut after = before.clone();
        after.phase = Phase::Complete;
        assert!(before.check_transition(&after).is_err());
    }

    #[test]
    fn test_terminal_is_immutable() {
        let mut before = running(0);
        before.phase = Phase::Complete;
        let after = before.clone();
        assert!(before.check_transition(&after).unwrap_err().contains("already complete"));
    }

    #[test]
    fn test_failed_requires_error() {
        let before = running(1);
        let mut after = before.clone();
        after.phase = Phase::Failed;
        assert!(before.check_transition(&after).is_err());
        after.error = Some("detector unreachable".to_string());
        assert!(before.check_transition(&after).is_ok());
    }
}
