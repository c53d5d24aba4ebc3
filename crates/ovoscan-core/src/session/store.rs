//! Session store
//!
//! Owns the table of sessions and every lifecycle transition. The table lock
//! is held only to find or insert an entry; each session has its own lock, so
//! mutations of one session never wait on another.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::types::{Phase, Session, SessionId};
use crate::config::StoreConfig;
use crate::error::{Error, Result};

struct Entry {
    session: Session,
    /// Set once a writer lease has been handed out
    claimed: bool,
}

type EntryRef = Arc<Mutex<Entry>>;

/// In-memory session table with age- and capacity-based eviction
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, EntryRef>>,
    retention: TimeDelta,
    max_sessions: usize,
}

impl SessionStore {
    /// Create a store that keeps finished sessions for `retention`
    pub fn new(retention: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.retention(), config.max_sessions)
    }

    /// Allocate a fresh `Pending` session for `total` images
    pub fn create(&self, total: usize) -> Result<SessionId> {
        let now = Utc::now();
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.max_sessions {
            let evicted = Self::evict_locked(&mut sessions, self.retention, now, None);
            let needed = (sessions.len() + 1).saturating_sub(self.max_sessions);
            let evicted_oldest = if needed > 0 {
                Self::evict_locked(&mut sessions, TimeDelta::MIN, now, Some(needed))
            } else {
                0
            };
            debug!(
                evicted = evicted + evicted_oldest,
                "Evicted sessions to make room"
            );
            if sessions.len() >= self.max_sessions {
                return Err(Error::Capacity(self.max_sessions));
            }
        }

        let id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let entry = Entry {
            session: Session::new(id.clone(), total, now),
            claimed: false,
        };
        sessions.insert(id.clone(), Arc::new(Mutex::new(entry)));
        info!(session_id = %id, total, "Session created");

        Ok(id)
    }

    /// Snapshot of a session
    ///
    /// Expired sessions are dropped here as well as by the sweep, so an
    /// expired id reads exactly like one that never existed.
    pub fn get(&self, id: &str) -> Result<Session> {
        let entry = self.entry(id)?;
        let snapshot = entry.lock().session.clone();

        if self.is_expired(&snapshot, Utc::now()) {
            self.sessions.write().remove(id);
            debug!(session_id = %id, "Evicted expired session on access");
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(snapshot)
    }

    /// Apply `mutator` to a session as one atomic transition
    ///
    /// The mutator works on a copy; the copy replaces the stored session only
    /// if it is a legal successor. Returns the committed snapshot.
    pub fn update<F>(&self, id: &str, mutator: F) -> Result<Session>
    where
        F: FnOnce(&mut Session),
    {
        let entry = self.entry(id)?;
        let mut guard = entry.lock();

        let mut next = guard.session.clone();
        mutator(&mut next);

        if let Err(reason) = guard.session.check_transition(&next) {
            error!(session_id = %id, %reason, "Rejected session update");
            return Err(Error::Consistency(reason));
        }

        guard.session = next.clone();
        Ok(next)
    }

    /// Hand out the exclusive right to mutate a session
    ///
    /// Each session can be claimed once; a second claim is a consistency
    /// fault.
    pub fn claim(self: &Arc<Self>, id: &str) -> Result<SessionWriter> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock();
        if guard.claimed {
            return Err(Error::Consistency(format!(
                "session {} already has a writer",
                id
            )));
        }
        guard.claimed = true;

        Ok(SessionWriter {
            store: Arc::clone(self),
            id: id.to_string(),
        })
    }

    /// Remove terminal sessions older than the retention window
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    /// Same as [`evict_expired`](Self::evict_expired) with an explicit clock
    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        let evicted = Self::evict_locked(&mut sessions, self.retention, now, None);
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted expired sessions");
        }
        evicted
    }

    /// Run [`evict_expired`](Self::evict_expired) every `interval` until
    /// `shutdown` fires or the store is dropped
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(store) = store.upgrade() else { break };
                        store.evict_expired();
                    }
                }
            }
            debug!("Session sweeper stopped");
        })
    }

    /// Number of sessions currently held
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Check if a session is held, without the expiry check
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    fn entry(&self, id: &str) -> Result<EntryRef> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.is_terminal() && now - session.created_at >= self.retention
    }

    /// Drop terminal sessions at least `min_age` old, oldest first, at most
    /// `limit` of them
    fn evict_locked(
        sessions: &mut HashMap<SessionId, EntryRef>,
        min_age: TimeDelta,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> usize {
        let mut candidates: Vec<(DateTime<Utc>, SessionId)> = sessions
            .iter()
            .filter_map(|(id, entry)| {
                let entry = entry.lock();
                let session = &entry.session;
                (session.is_terminal() && now - session.created_at >= min_age)
                    .then(|| (session.created_at, id.clone()))
            })
            .collect();
        candidates.sort();
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }

        for (_, id) in &candidates {
            sessions.remove(id);
        }
        candidates.len()
    }
}

/// Exclusive mutation handle for one session, held by the job running it
pub struct SessionWriter {
    store: Arc<SessionStore>,
    id: SessionId,
}

impl SessionWriter {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Move the session from `Pending` to `Running`
    pub fn start(&self) -> Result<Session> {
        self.store.update(&self.id, |session| {
            session.phase = Phase::Running;
            session.started_at = Some(Utc::now());
        })
    }

    /// Record the label for one image; returns the new processed count
    pub fn record(&self, filename: &str, label: impl Into<String>) -> Result<usize> {
        let label = label.into();
        let session = self.store.update(&self.id, |session| {
            session.results.insert(filename.to_string(), label);
            session.processed += 1;
        })?;
        Ok(session.processed)
    }

    /// Mark every image as done
    pub fn complete(&self) -> Result<Session> {
        self.store.update(&self.id, |session| {
            session.phase = Phase::Complete;
            session.finished_at = Some(Utc::now());
        })
    }

    /// Stop the session with `error`, keeping whatever results exist
    pub fn fail(&self, error: impl Into<String>) -> Result<Session> {
        let error = error.into();
        self.store.update(&self.id, |session| {
            session.phase = Phase::Failed;
            session.error = Some(error);
            session.finished_at = Some(Utc::now());
        })
    }
}
